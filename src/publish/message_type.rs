use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// CI event types stamped into `CI_TYPE`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    CodeQualityChecksDone,
    ComponentBuildDone,
    Custom,
    EarlyPerformanceTestingDone,
    EarlySecurityTestingDone,
    ImageUploaded,
    FunctionalTestCoverageDone,
    FunctionalTestingDone,
    NonfunctionalTestingDone,
    OotbTestingDone,
    PeerReviewDone,
    ProductAcceptedForReleaseTesting,
    ProductBuildDone,
    ProductBuildInStaging,
    ProductTestCoverageDone,
    PullRequest,
    SecurityChecksDone,
    TestingStarted,
    TestingCompleted,
    #[serde(rename = "tier-0-testing-done")]
    Tier0TestingDone,
    #[serde(rename = "tier-1-testing-done")]
    Tier1TestingDone,
    #[serde(rename = "tier-2-integration-testing-done")]
    Tier2IntegrationTestingDone,
    #[serde(rename = "tier-2-validation-testing-done")]
    Tier2ValidationTestingDone,
    #[serde(rename = "tier-3-testing-done")]
    Tier3TestingDone,
    UnitTestCoverageDone,
    UpdateDefectStatus,
}

#[derive(Debug, Error, PartialEq)]
#[error("Unknown message type: {0}")]
pub struct UnknownMessageType(pub String);

impl MessageType {
    pub const ALL: [MessageType; 26] = [
        MessageType::CodeQualityChecksDone,
        MessageType::ComponentBuildDone,
        MessageType::Custom,
        MessageType::EarlyPerformanceTestingDone,
        MessageType::EarlySecurityTestingDone,
        MessageType::ImageUploaded,
        MessageType::FunctionalTestCoverageDone,
        MessageType::FunctionalTestingDone,
        MessageType::NonfunctionalTestingDone,
        MessageType::OotbTestingDone,
        MessageType::PeerReviewDone,
        MessageType::ProductAcceptedForReleaseTesting,
        MessageType::ProductBuildDone,
        MessageType::ProductBuildInStaging,
        MessageType::ProductTestCoverageDone,
        MessageType::PullRequest,
        MessageType::SecurityChecksDone,
        MessageType::TestingStarted,
        MessageType::TestingCompleted,
        MessageType::Tier0TestingDone,
        MessageType::Tier1TestingDone,
        MessageType::Tier2IntegrationTestingDone,
        MessageType::Tier2ValidationTestingDone,
        MessageType::Tier3TestingDone,
        MessageType::UnitTestCoverageDone,
        MessageType::UpdateDefectStatus,
    ];

    /// Wire identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::CodeQualityChecksDone => "code-quality-checks-done",
            MessageType::ComponentBuildDone => "component-build-done",
            MessageType::Custom => "custom",
            MessageType::EarlyPerformanceTestingDone => "early-performance-testing-done",
            MessageType::EarlySecurityTestingDone => "early-security-testing-done",
            MessageType::ImageUploaded => "image-uploaded",
            MessageType::FunctionalTestCoverageDone => "functional-test-coverage-done",
            MessageType::FunctionalTestingDone => "functional-testing-done",
            MessageType::NonfunctionalTestingDone => "nonfunctional-testing-done",
            MessageType::OotbTestingDone => "ootb-testing-done",
            MessageType::PeerReviewDone => "peer-review-done",
            MessageType::ProductAcceptedForReleaseTesting => "product-accepted-for-release-testing",
            MessageType::ProductBuildDone => "product-build-done",
            MessageType::ProductBuildInStaging => "product-build-in-staging",
            MessageType::ProductTestCoverageDone => "product-test-coverage-done",
            MessageType::PullRequest => "pull-request",
            MessageType::SecurityChecksDone => "security-checks-done",
            MessageType::TestingStarted => "testing-started",
            MessageType::TestingCompleted => "testing-completed",
            MessageType::Tier0TestingDone => "tier-0-testing-done",
            MessageType::Tier1TestingDone => "tier-1-testing-done",
            MessageType::Tier2IntegrationTestingDone => "tier-2-integration-testing-done",
            MessageType::Tier2ValidationTestingDone => "tier-2-validation-testing-done",
            MessageType::Tier3TestingDone => "tier-3-testing-done",
            MessageType::UnitTestCoverageDone => "unit-test-coverage-done",
            MessageType::UpdateDefectStatus => "update-defect-status",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = UnknownMessageType;

    /// Accepts the wire identifier in any case; `_` may stand in for `-`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        MessageType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| UnknownMessageType(s.to_string()))
    }
}
