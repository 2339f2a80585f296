pub mod bom;
pub mod bom_component;
pub mod product;
pub mod production_order;
pub mod purchase_item;
pub mod purchase_order;
pub mod stock_movement;
