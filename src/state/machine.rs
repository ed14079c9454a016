/// Job state and substate definitions
///
/// The main states form a directed transition graph; each working state
/// carries a fixed ordered set of substates.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Main lifecycle states for a crawl job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Initializing,
    Crawling,
    Extracting,
    Processing,
    Completed,
    Failed,
    Paused,
    Cancelled,
}

/// Substates of the three working main states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobSubstate {
    // CRAWLING
    DiscoveringUrls,
    DownloadingPages,
    DownloadingDocuments,

    // EXTRACTING
    PdfExtraction,
    Ocr,
    TableDetection,

    // PROCESSING
    MetadataExtraction,
    QualityScoring,
    Deduplication,
    Curation,
}

impl JobState {
    /// Returns the set of states this state may transition into
    ///
    /// Terminal states return an empty slice.
    pub fn valid_transitions(self) -> &'static [JobState] {
        use JobState::*;
        match self {
            Queued => &[Initializing, Cancelled],
            Initializing => &[Crawling, Failed, Cancelled],
            Crawling => &[Extracting, Paused, Failed, Cancelled],
            Extracting => &[Processing, Paused, Failed, Cancelled],
            Processing => &[Completed, Paused, Failed, Cancelled],
            Paused => &[Crawling, Extracting, Processing, Cancelled],
            Completed | Failed | Cancelled => &[],
        }
    }

    /// Returns true if `to` is a legal next state from here
    pub fn can_transition(self, to: JobState) -> bool {
        self.valid_transitions().contains(&to)
    }

    /// Returns the ordered substates of this state (empty for non-working states)
    pub fn substates(self) -> &'static [JobSubstate] {
        use JobSubstate::*;
        match self {
            JobState::Crawling => &[DiscoveringUrls, DownloadingPages, DownloadingDocuments],
            JobState::Extracting => &[PdfExtraction, Ocr, TableDetection],
            JobState::Processing => &[
                MetadataExtraction,
                QualityScoring,
                Deduplication,
                Curation,
            ],
            _ => &[],
        }
    }

    /// Returns true if this is a terminal state (no outgoing transitions)
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns true if this is one of the three active working phases
    pub fn is_active_phase(self) -> bool {
        matches!(self, Self::Crawling | Self::Extracting | Self::Processing)
    }

    /// Converts the state to its wire/database string representation
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Initializing => "initializing",
            Self::Crawling => "crawling",
            Self::Extracting => "extracting",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Paused => "paused",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parses a state from its string representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "initializing" => Some(Self::Initializing),
            "crawling" => Some(Self::Crawling),
            "extracting" => Some(Self::Extracting),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "paused" => Some(Self::Paused),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Returns all states
    pub fn all() -> &'static [JobState] {
        use JobState::*;
        &[
            Queued,
            Initializing,
            Crawling,
            Extracting,
            Processing,
            Completed,
            Failed,
            Paused,
            Cancelled,
        ]
    }
}

impl JobSubstate {
    /// Converts the substate to its wire/database string representation
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DiscoveringUrls => "discovering_urls",
            Self::DownloadingPages => "downloading_pages",
            Self::DownloadingDocuments => "downloading_documents",
            Self::PdfExtraction => "pdf_extraction",
            Self::Ocr => "ocr",
            Self::TableDetection => "table_detection",
            Self::MetadataExtraction => "metadata_extraction",
            Self::QualityScoring => "quality_scoring",
            Self::Deduplication => "deduplication",
            Self::Curation => "curation",
        }
    }

    /// Parses a substate from its string representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "discovering_urls" => Some(Self::DiscoveringUrls),
            "downloading_pages" => Some(Self::DownloadingPages),
            "downloading_documents" => Some(Self::DownloadingDocuments),
            "pdf_extraction" => Some(Self::PdfExtraction),
            "ocr" => Some(Self::Ocr),
            "table_detection" => Some(Self::TableDetection),
            "metadata_extraction" => Some(Self::MetadataExtraction),
            "quality_scoring" => Some(Self::QualityScoring),
            "deduplication" => Some(Self::Deduplication),
            "curation" => Some(Self::Curation),
            _ => None,
        }
    }

    /// Returns the main state this substate belongs to
    pub fn parent_state(self) -> JobState {
        use JobSubstate::*;
        match self {
            DiscoveringUrls | DownloadingPages | DownloadingDocuments => JobState::Crawling,
            PdfExtraction | Ocr | TableDetection => JobState::Extracting,
            MetadataExtraction | QualityScoring | Deduplication | Curation => {
                JobState::Processing
            }
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Display for JobSubstate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
