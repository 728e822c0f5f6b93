pub mod alert;
pub mod audit;
pub mod customer;
pub mod inventory;
pub mod operation;
pub mod order;
pub mod product;
pub mod review;
pub mod settings;
pub mod subscription;
pub mod user;

pub use alert::{AlertFilters, AlertInput, AlertKind, DispatchReport, PendingAlert};
pub use audit::{AuditFilters, AuditLog};
pub use customer::{Customer, CustomerDetail, CustomerInput, CustomerSearch, LoyaltyAdjustment};
pub use inventory::{
    InventoryItem, InventoryMovement, ItemFilters, ItemInput, ItemKind, MovementInput,
    MovementKind, MovementResult,
};
pub use operation::{Operation, OperationCategory, OperationFilters, OperationInput, PaymentInput};
pub use order::{
    CartLine, CartRequest, CheckoutRequest, CheckoutResponse, Order, OrderFilters, OrderItem,
    OrderLookupQuery, OrderStatus, OrderStatusUpdate, OrderWithItems,
};
pub use product::{Product, ProductInput, ProductQuery};
pub use review::{Review, ReviewInput};
pub use settings::{Settings, SettingsUpdate};
pub use subscription::{
    SubscribeRequest, SubscribeResponse, Subscription, SubscriptionFilters, SubscriptionStatus,
};
pub use user::{CreateUser, LoginRequest, User, UserResponse};
