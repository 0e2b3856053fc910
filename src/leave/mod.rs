pub mod compensatory;
pub mod ledger;
