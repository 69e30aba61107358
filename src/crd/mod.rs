mod endpoint;

pub use self::endpoint::*;
