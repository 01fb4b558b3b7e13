pub mod account;
pub mod accounts;
pub mod browser;
pub mod extractor;
pub mod page;
pub mod recovery;
pub mod resolver;
pub mod run;
pub mod writer;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;
