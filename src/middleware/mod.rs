pub mod boundary;
pub mod json;
pub mod response;

pub use boundary::{handle_panic, route_not_found};
pub use json::ValidJson;
pub use response::{ApiResponse, ApiResult};
