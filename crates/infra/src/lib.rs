//! Infrastructure layer: persistence, module gating, config, and the engines
//! that compose the pure inventory and sales domains behind them.

mod catalog;
pub mod config;
pub mod error;
pub mod fulfillment;
pub mod modules;
pub mod posting;
pub mod receipts;
pub mod reports;
pub mod services;
pub mod store;


pub use config::AppConfig;
pub use error::{EngineError, EngineResult};
pub use fulfillment::{
    CreateDeliveryRequest, CreateReturnRequest, DELIVERY_SOURCE, FulfillmentResult, RETURN_SOURCE,
    SalesFulfillmentBridge,
};
pub use modules::{InMemoryModuleRegistry, ModuleGuard};
pub use posting::{
    AdjustmentLine, AdjustmentRequest, InventoryPostingEngine, PostingHeader, PostingRequest,
    PostingResult, StockInLine, StockInRequest, StockOutLine, StockOutRequest, TransferLine,
    TransferRequest,
};
pub use receipts::{CreateReceiptRequest, ReceiptAllocationEngine};
pub use reports::InventoryReportsEngine;
pub use services::{Backend, ErpServices};
