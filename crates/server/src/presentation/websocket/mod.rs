mod handler;
mod message;

pub use handler::{WsQuery, ws_handler};
pub use message::{PriceUpdate, WsRequest, WsResponse, parse_stream_param, stream_name};
