pub mod account;
pub mod money;
pub mod props;
pub mod transaction;
