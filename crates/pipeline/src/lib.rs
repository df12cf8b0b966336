pub mod error;
pub mod pipeline;
pub mod sentiment;
pub mod stats;
pub mod transform;
pub mod warehouse;

pub use error::{AnalysisError, PipelineError, RecordError, SinkError};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use sentiment::{LanguageClient, SentimentAnalyzer, SentimentEnricher};
pub use stats::{PipelineStats, StatsSnapshot};
pub use transform::{parse, parse_batch, ParsedMessage, RejectedMessage};
pub use warehouse::{
    tweets_schema, AppendReport, BigQueryClient, FieldSchema, RetryPolicy, TableSchema,
    WarehouseClient, WarehouseRow, WarehouseSink,
};
