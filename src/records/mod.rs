//! Record operations behind the HTTP surface.

mod service;
mod types;

pub use service::{RecordApi, RecordService, USER_ID_KEY};
pub use types::{
    BatchRecord, CreateRecordRequest, CreateRecordResponse, DEFAULT_RESULT_LIMIT, DeleteResponse,
    QueryRequest, QueryResponse, RecordError, RequestContext, SearchHits, SearchQuery,
    SearchRequest, SearchResponse, SegmentParams, SplitConfig, SplitParams, UpsertCountResponse,
    UpsertRecordRequest,
};
