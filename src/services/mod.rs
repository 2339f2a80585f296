// Ledger and catalog
pub mod catalog;
pub mod stock_ledger;

// Manufacturing
pub mod bom;
pub mod production;

// Procurement
pub mod purchasing;
