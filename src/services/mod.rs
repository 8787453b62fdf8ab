pub mod dataset;
pub mod expectations;
pub mod report;
pub mod storage;
pub mod validation_service;
