pub mod domain;
pub mod garde;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "telemetry")]
pub mod telemetry;

// Re-export mocks when testing feature is enabled
#[cfg(any(test, feature = "testing"))]
pub use domain::MockAppliedMutationRepository;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockBeneficiaryRepository;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockFundRepository;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockRemoteBatchEndpoint;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockTransactionRepository;
