pub mod bootstrap;
pub mod codes;
pub mod collaborators;
pub mod config;
mod gateway;
pub mod request;
pub mod telemetry;

pub use crate::codes::ResponseCode;
pub use crate::collaborators::{BankDirectory, FlatLimit, LimitChecker, StaticBankDirectory};
pub use crate::config::{ConfigError, GatewayConfig, LockBackend};
pub use crate::gateway::{
    CREDIT_PATH, Gateway, REVERSAL_PATH, WITHDRAW_PATH, WITHDRAW_RESULT_PATH,
};
pub use crate::request::{
    CreditRequest, ReversalRequest, SettlementResponse, TitleFetchRequest, WithdrawRequest,
    WithdrawResultRequest,
};

pub use ledger;
