pub mod create;
pub mod package;
pub mod scan;
pub mod search;
pub mod validate;
