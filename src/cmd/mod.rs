mod fold_cmd;
mod push_cmd;

pub use fold_cmd::*;
pub use push_cmd::*;
