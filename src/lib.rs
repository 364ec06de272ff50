//! DigiTrust-AVP 地址置信度评分核心
//!
//! 纯评分逻辑（聚合、分级、欺诈、路由、解释）不做任何 IO；
//! `store` / `ledger` / `signer` 负责持久化与存证，`api` 把它们挂到 HTTP 上。

pub mod address;
pub mod aggregate;
pub mod api;
pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod evidence;
pub mod fingerprint;
pub mod fraud;
pub mod ledger;
pub mod reasons;
pub mod result;
pub mod router;
pub mod signals;
pub mod signer;
pub mod store;
