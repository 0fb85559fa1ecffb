//! Infrastructure layer - Provider implementations and runtime services

pub mod finalizer;
pub mod in_memory;
pub mod logging;
pub mod remote;
pub mod serialization;
pub mod storage;
