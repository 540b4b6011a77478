mod key;

pub use key::KeyImpl;
