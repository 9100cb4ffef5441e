pub mod relay;
pub mod room;
pub mod session;

pub use relay::SyncRelay;
pub use room::RoomRegistry;
pub use session::{Session, SessionState};
