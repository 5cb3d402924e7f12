pub mod candle_port;
pub mod config_port;
pub mod event_port;
pub mod order_port;
pub mod state_port;
