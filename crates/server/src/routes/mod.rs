//! Thin axum handlers over the `server_api` operations. Handlers only
//! extract, call and wrap; authorization lives in `server_api`.

pub(crate) mod account;
pub(crate) mod board;
pub(crate) mod chat;
pub(crate) mod feedback;
pub(crate) mod okr;
pub(crate) mod org;
pub(crate) mod subscription;
