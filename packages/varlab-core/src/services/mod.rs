//! Application services built on the risk model and data ports.

pub mod risk_calculation;
pub mod stress_testing;

pub use risk_calculation::{RiskCalculationRequest, RiskCalculationResponse, RiskCalculationService};
pub use stress_testing::{
    LinearityCheck, StressTestRequest, StressTestResponse, StressTestResult, StressTestingService,
};
