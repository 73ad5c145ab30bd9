pub mod listener;
pub mod retry;

pub use listener::{BusFault, ChannelFaultListener, FaultListener, FaultListeners, ListenerId};
pub use retry::Transport;
