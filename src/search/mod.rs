//! Question answering: intent analysis, retrieval routing and answer
//! synthesis.

mod answer;
mod engine;
mod intent;
mod prompt;

pub use answer::{
    add_staleness_warning, append_encyclopedia_sources, build_combined_answer,
    build_direct_answer, build_encyclopedia_answer, build_generated_answer, build_intent_answer,
    build_quotes_answer, build_steps_answer, build_summary_answer, Answer, AnswerType, SourceInfo,
};
pub use engine::{EngineSettings, SearchEngine};
pub use intent::{analyze_query, Intent, QueryAnalysis};
pub use prompt::{build_context, build_prompt};
