pub use self::logger::*;
