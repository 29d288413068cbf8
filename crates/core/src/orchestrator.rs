use crate::conversation::ConversationManager;
use crate::embeddings::Embedder;
use crate::error::SearchError;
use crate::index::VectorIndex;
use crate::models::{ConversationTurn, RetrievalOptions, SearchAnswer, SynthesisOptions};
use crate::retriever::Retriever;
use crate::synthesis::AnswerSynthesizer;
use crate::traits::{LanguageModel, VectorStore};
use tracing::{debug, info};

/// Resolve, retrieve, synthesize: one conversational search turn.
pub struct ThesisSearchService<E, S, L> {
    index: VectorIndex<E, S>,
    conversation: ConversationManager,
    synthesizer: AnswerSynthesizer<L>,
    retrieval: RetrievalOptions,
}

impl<E, S, L> ThesisSearchService<E, S, L>
where
    E: Embedder + Send + Sync,
    S: VectorStore + Send + Sync,
    L: LanguageModel + Send + Sync,
{
    pub fn new(
        index: VectorIndex<E, S>,
        llm: L,
        retrieval: RetrievalOptions,
        synthesis: SynthesisOptions,
    ) -> Result<Self, SearchError> {
        Ok(Self {
            index,
            conversation: ConversationManager::new()?,
            synthesizer: AnswerSynthesizer::new(llm, synthesis)?,
            retrieval,
        })
    }

    pub fn index(&self) -> &VectorIndex<E, S> {
        &self.index
    }

    /// Answers `query` in the context of `history`, oldest turn first.
    ///
    /// Only an empty query or a failing store is an error; model failures are
    /// reported inside the overview.
    pub async fn answer(
        &self,
        query: &str,
        history: &[ConversationTurn],
    ) -> Result<SearchAnswer, SearchError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(SearchError::Request("query is empty".to_string()));
        }

        let resolved_query = self.conversation.resolve_query(query, history);
        if resolved_query != query {
            debug!(query, resolved = %resolved_query, "query rewritten from history");
        }

        let outcome = Retriever::new(&self.index, self.retrieval)
            .search(&resolved_query, self.retrieval.top_k)
            .await?;
        let synthesis = self
            .synthesizer
            .synthesize(&outcome.hits, &resolved_query)
            .await;

        info!(
            query,
            documents = outcome.documents.len(),
            sources = synthesis.sources.len(),
            "search answered"
        );

        Ok(SearchAnswer {
            query: query.to_string(),
            resolved_query,
            overview: synthesis.answer,
            documents: outcome.documents,
            sources: synthesis.sources,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::error::LlmError;
    use crate::ingest::{Indexer, SourceDocument};
    use crate::models::IndexingOptions;
    use crate::stores::LocalVectorStore;
    use crate::synthesis::NO_RESULTS_MESSAGE;
    use crate::traits::GenerationParams;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::tempdir;

    impl ThesisSearchService<CharacterNgramEmbedder, LocalVectorStore, CannedLlm> {
        fn synthesizer_prompts(&self) -> Vec<String> {
            self.synthesizer.llm().prompts.lock().unwrap().clone()
        }
    }

    struct CannedLlm {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    impl CannedLlm {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for CannedLlm {
        async fn generate(&self, prompt: &str, _params: GenerationParams) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.reply.clone())
        }
    }

    fn document(name: &str, text: &str) -> SourceDocument {
        SourceDocument {
            path: PathBuf::from(format!("/corpus/{name}")),
            modified: Utc.with_ymd_and_hms(2024, 5, 2, 9, 0, 0).unwrap(),
            text: text.to_string(),
        }
    }

    const RICE: &str = "A Thesis entitled \"Salinity Tolerance of IR64 Rice\"\n\
        Master of Science in Agronomy\n\
        Rice seedlings were grown under saline irrigation. Salinity reduced rice tillering. \
        Tolerant rice lines kept their yield under salt.";
    const MANGROVE: &str = "A Thesis entitled \"Mangrove Nursery Habitats\"\n\
        Master of Science in Marine Biology\n\
        Mangrove roots shelter juvenile fish. Mangrove mangrove mangrove forests recovered after planting. \
        Mangrove seedlings survived in mangrove mud.";
    const CORAL: &str = "A Thesis entitled \"Coral Bleaching Along Reef Flats\"\n\
        Master of Science in Marine Science\n\
        Coral colonies bleached during warm water events. Reef recovery was slow after bleaching.";

    async fn indexed_service(
        dir: &std::path::Path,
        reply: &str,
    ) -> Result<ThesisSearchService<CharacterNgramEmbedder, LocalVectorStore, CannedLlm>, Box<dyn std::error::Error>>
    {
        let store = LocalVectorStore::open(dir.join("vectors.json")).await?;
        let index = VectorIndex::new(CharacterNgramEmbedder::default(), store);

        let mut indexer = Indexer::new(&index, IndexingOptions::in_dir(dir))?;
        indexer
            .index_documents(vec![
                document("rice.txt", RICE),
                document("mangrove.txt", MANGROVE),
                document("coral.txt", CORAL),
            ])
            .await?;
        drop(indexer);

        let retrieval = RetrievalOptions {
            distance_threshold: 2.0,
            ..RetrievalOptions::default()
        };
        Ok(ThesisSearchService::new(
            index,
            CannedLlm::new(reply),
            retrieval,
            SynthesisOptions::default(),
        )?)
    }

    #[tokio::test]
    async fn answer_ranks_the_closest_document_first() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let service = indexed_service(dir.path(), "Mangroves shelter fish. [1]").await?;

        let answer = service.answer("mangrove mangrove", &[]).await?;

        assert_eq!(answer.resolved_query, "mangrove mangrove");
        assert_eq!(answer.documents.len(), 3);
        assert_eq!(answer.documents[0].file, "mangrove.txt");
        assert_eq!(answer.documents[0].title, "Mangrove Nursery Habitats");
        assert_eq!(answer.overview, "Mangroves shelter fish [1].");
        assert_eq!(answer.sources[0].file, "mangrove.txt");

        let prompts = service.synthesizer_prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("[1] Title: Mangrove Nursery Habitats"));
        Ok(())
    }

    #[tokio::test]
    async fn follow_up_queries_carry_entities_from_history() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let service = indexed_service(dir.path(), "Tolerant lines held yield. [1]").await?;
        let history = vec![ConversationTurn {
            query: "rice salinity".to_string(),
            overview: "IR64 tolerated moderate salinity [1].".to_string(),
        }];

        let answer = service.answer("  what about its tillering?  ", &history).await?;

        assert_eq!(answer.query, "what about its tillering?");
        assert_eq!(answer.resolved_query, "what about its tillering? IR64");
        Ok(())
    }

    #[tokio::test]
    async fn empty_index_answers_without_calling_the_model() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = LocalVectorStore::open(dir.path().join("vectors.json")).await?;
        let index = VectorIndex::new(CharacterNgramEmbedder::default(), store);
        let service = ThesisSearchService::new(
            index,
            CannedLlm::new("unused"),
            RetrievalOptions::default(),
            SynthesisOptions::default(),
        )?;

        let answer = service.answer("rice", &[]).await?;

        assert_eq!(answer.overview, NO_RESULTS_MESSAGE);
        assert!(answer.documents.is_empty());
        assert!(answer.sources.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn blank_query_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let service = indexed_service(dir.path(), "unused").await?;

        assert!(matches!(
            service.answer("   ", &[]).await,
            Err(SearchError::Request(_))
        ));
        Ok(())
    }
}
