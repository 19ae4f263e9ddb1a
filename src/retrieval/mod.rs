//! 检索层：语义检索证据 + 预计算洞察缓存

pub mod http;
pub mod insights;
pub mod keyword;
pub mod search;

pub use http::HttpSemanticSearch;
pub use insights::{
    topic_hints, InsightCache, InsightError, InsightKind, InsightRecord, InsightStore,
    MemoryInsightStore,
};
pub use keyword::{terms, KeywordSearch};
pub use search::{EvidenceRecord, RetrievalTool, SearchError, SemanticSearch};
