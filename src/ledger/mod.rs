//! Business arithmetic over ledger, order and catalog rows. Nothing in here touches the
//! database; handlers fetch rows and hand them to these functions.

pub mod costing;
pub mod loyalty;
pub mod money;
pub mod payment;
pub mod pricing;
pub mod summary;

pub use costing::derive_cost;
pub use payment::{register_payment, PaymentStatus};
pub use pricing::{one_time_price, quote_cart, CartQuote};
pub use summary::{dashboard, profit_by_cut, stock_by_plot, CutProfit, Dashboard, StockSummary};
