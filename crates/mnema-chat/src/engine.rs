//! Chat turn processing.
//!
//! One turn: ensure session → persist user message → retrieve → assemble
//! prompt → stream tokens → persist assistant message and retrieval trace
//! → extract memories in the background. Turns of one session serialize on
//! a per-session lock, so messages stay totally ordered even under
//! concurrent requests.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};
use uuid::Uuid;

use mnema_core::{
    defaults, new_v7, ChatMessage, ChatRagContextRecord, ChatSession, ChatStore, Error,
    GenerationBackend, MemoryRepository, MessageRole, PromptMessage, RagChunk, RagContext, Result,
    Source, StreamingGeneration, TokenStream, TokenUsage,
};
use mnema_db::Database;
use mnema_rag::{build_context, ContextConfig, RetrievalParams, Retriever};

use crate::consolidate::{ConsolidateOptions, Consolidator};
use crate::memory::MemoryExtractor;
use crate::prompts::{CHAT_SYSTEM_PROMPT, CONTEXT_HEADER, MEMORY_HEADER, NO_CONTEXT_NOTE};

/// Completion backend able to both block and stream.
pub trait ChatBackend: GenerationBackend + StreamingGeneration {}
impl<T: GenerationBackend + StreamingGeneration> ChatBackend for T {}

/// Everything assembled before generation starts. Holding the session
/// guard keeps a second concurrent turn for the same session queued until
/// this one finalizes (or is dropped on disconnect).
pub struct PreparedTurn {
    pub request_id: Uuid,
    pub session: ChatSession,
    pub session_created: bool,
    pub user_message: ChatMessage,
    pub prompt: Vec<PromptMessage>,
    pub rag_context: RagContext,
    pub sources: Vec<Source>,
    pub retrieval_params: RetrievalParams,
    _session_guard: OwnedMutexGuard<()>,
}

/// Result of a finalized turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub assistant_message: ChatMessage,
    pub sources: Vec<Source>,
}

/// The conversational engine.
pub struct ChatEngine {
    db: Database,
    backend: Arc<dyn ChatBackend>,
    retriever: Retriever,
    extractor: MemoryExtractor,
    consolidator: Consolidator,
    retrieval_params: RetrievalParams,
    context_config: ContextConfig,
    session_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl ChatEngine {
    pub fn new(
        db: Database,
        backend: Arc<dyn ChatBackend>,
        retriever: Retriever,
        extractor: MemoryExtractor,
        consolidator: Consolidator,
        retrieval_params: RetrievalParams,
        context_config: ContextConfig,
    ) -> Self {
        Self {
            db,
            backend,
            retriever,
            extractor,
            consolidator,
            retrieval_params,
            context_config,
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Reuse the caller's session when it exists, belongs to them, and is
    /// active; otherwise create a fresh one.
    pub async fn ensure_session(
        &self,
        user_id: Uuid,
        session_id: Option<Uuid>,
    ) -> Result<(ChatSession, bool)> {
        if let Some(id) = session_id {
            match self.db.chat.get_session(id).await? {
                Some(session) if session.user_id == user_id && session.is_active => {
                    return Ok((session, false));
                }
                Some(_) | None => {
                    warn!(
                        subsystem = "chat",
                        session_id = %id,
                        user_id = %user_id,
                        "Supplied session unusable, creating a new one"
                    );
                }
            }
        }

        let session = self.db.chat.create_session(user_id, None).await?;
        Ok((session, true))
    }

    /// Run everything up to generation: persist the user message, retrieve
    /// context, assemble the prompt.
    pub async fn prepare_turn(
        &self,
        user_id: Uuid,
        session_id: Option<Uuid>,
        message: &str,
    ) -> Result<PreparedTurn> {
        let message = message.trim();
        if message.is_empty() {
            return Err(Error::Validation("message must not be empty".to_string()));
        }

        let (session, session_created) = self.ensure_session(user_id, session_id).await?;
        let session_guard = self.lock_session(session.id).await;

        let request_id = new_v7();

        let user_message = self
            .db
            .chat
            .create_message(
                session.id,
                MessageRole::User,
                message,
                json!({ "request_id": request_id }),
            )
            .await?;

        // Retrieval failure must not fail the turn.
        let chunks = match self
            .retriever
            .search(message, user_id, self.retrieval_params)
            .await
        {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!(
                    subsystem = "chat",
                    session_id = %session.id,
                    error = %e,
                    "Retrieval failed, degrading to no-context prompt"
                );
                vec![]
            }
        };
        let rag_context = build_context(&chunks, self.context_config);
        let sources = merge_chunks_to_sources(&rag_context.chunks);

        let memories = self
            .db
            .memories
            .active_for_session(session.id, defaults::CHAT_PROMPT_MEMORIES as i64)
            .await
            .unwrap_or_default();

        let history = self
            .db
            .chat
            .recent_messages(session.id, defaults::CHAT_HISTORY_TURNS as i64)
            .await?;

        let mut system = String::from(CHAT_SYSTEM_PROMPT);
        if !memories.is_empty() {
            system.push('\n');
            system.push_str(MEMORY_HEADER);
            system.push('\n');
            for memory in &memories {
                system.push_str(&format!("- {}\n", memory.content));
            }
        }
        system.push('\n');
        system.push_str(CONTEXT_HEADER);
        system.push('\n');
        if rag_context.is_empty() {
            system.push_str(NO_CONTEXT_NOTE);
        } else {
            system.push_str(&rag_context.context_text);
        }

        let mut prompt = vec![PromptMessage::system(system)];
        for msg in &history {
            prompt.push(PromptMessage {
                role: msg.role,
                content: msg.content.clone(),
            });
        }

        info!(
            subsystem = "chat",
            op = "prepare_turn",
            request_id = %request_id,
            session_id = %session.id,
            user_id = %user_id,
            result_count = rag_context.chunks.len(),
            context_tokens = rag_context.total_context_tokens,
            "Turn prepared"
        );

        Ok(PreparedTurn {
            request_id,
            session,
            session_created,
            user_message,
            prompt,
            rag_context,
            sources,
            retrieval_params: self.retrieval_params,
            _session_guard: session_guard,
        })
    }

    /// Start the streaming generation for a prepared turn.
    pub async fn start_stream(&self, prepared: &PreparedTurn) -> Result<TokenStream> {
        self.backend.generate_stream(&prepared.prompt).await
    }

    /// Non-streaming variant: generate, finalize, return the outcome and
    /// the full answer.
    pub async fn complete_turn(
        self: Arc<Self>,
        prepared: PreparedTurn,
        latency_start: std::time::Instant,
    ) -> Result<(String, TurnOutcome)> {
        let completion = self.backend.generate(&prepared.prompt).await?;
        let latency_ms = latency_start.elapsed().as_millis() as u64;
        let outcome = self
            .finalize_turn(prepared, &completion.content, completion.usage, latency_ms)
            .await?;
        Ok((completion.content, outcome))
    }

    /// Persist the assistant message and retrieval trace, derive the
    /// session title on first turn, and kick off background memory work.
    ///
    /// Only called once the stream finished cleanly — a disconnected or
    /// failed stream drops the `PreparedTurn` instead, discarding the
    /// partial answer.
    pub async fn finalize_turn(
        self: Arc<Self>,
        prepared: PreparedTurn,
        answer: &str,
        usage: TokenUsage,
        latency_ms: u64,
    ) -> Result<TurnOutcome> {
        let metadata = json!({
            "request_id": prepared.request_id,
            "model": self.backend.model_name(),
            "prompt_tokens": usage.prompt_tokens,
            "completion_tokens": usage.completion_tokens,
            "latency_ms": latency_ms,
            "rag_k": prepared.retrieval_params.k,
            "sources": prepared.sources,
        });

        let assistant_message = self
            .db
            .chat
            .create_message(prepared.session.id, MessageRole::Assistant, answer, metadata)
            .await?;

        let record = ChatRagContextRecord {
            id: Uuid::nil(),
            message_id: assistant_message.id,
            rag_chunks: serde_json::to_value(&prepared.rag_context.chunks)?,
            context_text: prepared.rag_context.context_text.clone(),
            total_context_tokens: prepared.rag_context.total_context_tokens as i32,
            extracted_keywords: prepared.rag_context.extracted_keywords.clone(),
            rag_k: prepared.retrieval_params.k as i32,
            rag_min_score: prepared.retrieval_params.min_score,
        };
        self.db.chat.create_rag_context(&record).await?;

        if prepared.session.title.is_none() {
            let title: String = prepared
                .user_message
                .content
                .chars()
                .take(defaults::SESSION_TITLE_CHARS)
                .collect();
            self.db.chat.set_title_if_unset(prepared.session.id, &title).await?;
        }

        info!(
            subsystem = "chat",
            op = "finalize_turn",
            request_id = %prepared.request_id,
            session_id = %prepared.session.id,
            completion_tokens = usage.completion_tokens,
            duration_ms = latency_ms,
            "Turn persisted"
        );

        let outcome = TurnOutcome {
            assistant_message,
            sources: prepared.sources.clone(),
        };

        // The guard drops here, after assistant persistence; extraction
        // runs unsupervised of the session lock.
        let session_id = prepared.session.id;
        let user_id = prepared.session.user_id;
        drop(prepared);
        self.spawn_memory_extraction(session_id, user_id);

        Ok(outcome)
    }

    /// Background memory extraction + optional auto-consolidation.
    fn spawn_memory_extraction(self: Arc<Self>, session_id: Uuid, user_id: Uuid) {
        let engine = self;
        tokio::spawn(async move {
            let conversation = match engine
                .db
                .chat
                .recent_messages(session_id, defaults::MEMORY_EXTRACT_TURNS as i64)
                .await
            {
                Ok(messages) => messages,
                Err(e) => {
                    warn!(
                        subsystem = "chat",
                        component = "memory",
                        session_id = %session_id,
                        error = %e,
                        "Could not load conversation for extraction"
                    );
                    return;
                }
            };

            if let Err(e) = engine
                .extractor
                .extract_and_store(&engine.db.memories, session_id, &conversation)
                .await
            {
                warn!(
                    subsystem = "chat",
                    component = "memory",
                    session_id = %session_id,
                    error = %e,
                    "Memory extraction failed"
                );
                return;
            }

            // Respects the profile's auto_consolidate setting.
            if let Err(e) = engine
                .consolidator
                .consolidate(user_id, &ConsolidateOptions::default())
                .await
            {
                warn!(
                    subsystem = "chat",
                    component = "consolidate",
                    user_id = %user_id,
                    error = %e,
                    "Auto-consolidation failed"
                );
            }
        });
    }

    async fn lock_session(&self, session_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.session_locks.lock().await;
            locks
                .entry(session_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Consolidator access for the explicit consolidation endpoints.
    pub fn consolidator(&self) -> &Consolidator {
        &self.consolidator
    }

    /// Database access for session CRUD handlers.
    pub fn db(&self) -> &Database {
        &self.db
    }
}

/// Merge chunk hits into one source per parent insight, best score wins,
/// ordered by descending score. `index` is the citation number of the
/// winning chunk inside the context block.
pub fn merge_chunks_to_sources(chunks: &[RagChunk]) -> Vec<Source> {
    let mut best: HashMap<Uuid, (usize, &RagChunk)> = HashMap::new();
    for (i, chunk) in chunks.iter().enumerate() {
        match best.get(&chunk.insight_id) {
            Some((_, existing)) if existing.score >= chunk.score => {}
            _ => {
                best.insert(chunk.insight_id, (i + 1, chunk));
            }
        }
    }

    let mut sources: Vec<Source> = best
        .into_values()
        .map(|(index, chunk)| Source {
            id: chunk.chunk_id,
            insight_id: chunk.insight_id,
            score: chunk.score,
            index,
            title: chunk.insight_title.clone(),
            url: chunk.insight_url.clone(),
        })
        .collect();

    sources.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.insight_id.cmp(&b.insight_id))
    });
    sources
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(insight_id: Uuid, index: i32, score: f32) -> RagChunk {
        RagChunk {
            chunk_id: Uuid::new_v4(),
            insight_id,
            chunk_index: index,
            chunk_text: format!("chunk {index}"),
            chunk_size: 10,
            score,
            insight_title: Some("Title".to_string()),
            insight_url: "https://example.com".to_string(),
            insight_summary: None,
        }
    }

    #[test]
    fn test_merge_sources_one_per_insight() {
        let insight = Uuid::new_v4();
        let chunks = vec![chunk(insight, 0, 0.9), chunk(insight, 1, 0.7)];
        let sources = merge_chunks_to_sources(&chunks);
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].score, 0.9);
        assert_eq!(sources[0].index, 1);
    }

    #[test]
    fn test_merge_sources_ordered_by_score() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let chunks = vec![chunk(a, 0, 0.4), chunk(b, 0, 0.8)];
        let sources = merge_chunks_to_sources(&chunks);
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].insight_id, b);
        assert_eq!(sources[1].insight_id, a);
    }

    #[test]
    fn test_merge_sources_empty() {
        assert!(merge_chunks_to_sources(&[]).is_empty());
    }

    #[test]
    fn test_merge_sources_keeps_citation_index_of_best_chunk() {
        let insight = Uuid::new_v4();
        let chunks = vec![
            chunk(Uuid::new_v4(), 0, 0.95),
            chunk(insight, 0, 0.5),
            chunk(insight, 1, 0.9),
        ];
        let sources = merge_chunks_to_sources(&chunks);
        let merged = sources.iter().find(|s| s.insight_id == insight).unwrap();
        // The 0.9-scoring chunk sat third in the context block.
        assert_eq!(merged.index, 3);
        assert_eq!(merged.score, 0.9);
    }
}
