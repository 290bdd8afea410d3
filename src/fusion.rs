//! Context fusion engine
//!
//! Gathers portfolio holdings and live search results for the current
//! question and folds them into the last conversation turn. Each source is
//! optional; a failed fetch only shrinks the context.

use crate::error::truncate_chars;
use crate::models::{
    ContentPart, ContextIdentifiers, ConversationTurn, FusionFlags, MessageContent,
    SearchResult, SupplementarySource,
};
use crate::portfolio::PortfolioSource;
use crate::search::LiveSearch;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Character budget for the rendered portfolio section
pub const PORTFOLIO_CHAR_BUDGET: usize = 3000;

const PORTFOLIO_HEADER: &str = "=== PORTFOLIO DATA ===";
const PORTFOLIO_FOOTER: &str = "=== END PORTFOLIO DATA ===";
const SEARCH_HEADER: &str = "=== LIVE SEARCH RESULTS ===";
const SEARCH_FOOTER: &str = "=== END LIVE SEARCH RESULTS ===";

pub struct ContextFusionEngine {
    portfolio: Arc<dyn PortfolioSource>,
    search: Arc<dyn LiveSearch>,
}

impl ContextFusionEngine {
    pub fn new(portfolio: Arc<dyn PortfolioSource>, search: Arc<dyn LiveSearch>) -> Self {
        Self { portfolio, search }
    }

    /// Return the conversation with its last turn augmented by whatever
    /// supplementary data could be gathered. Never fails.
    pub async fn augment(
        &self,
        conversation: Vec<ConversationTurn>,
        identifiers: Option<&ContextIdentifiers>,
        flags: &FusionFlags,
    ) -> Vec<ConversationTurn> {
        if !flags.include_live_data {
            return conversation;
        }

        let Some(last) = conversation.last() else {
            return conversation;
        };
        let query = last.content.plain_text();

        // Independent fetches: neither failure cancels the other.
        let (portfolio, search) = tokio::join!(
            self.fetch_portfolio(identifiers, flags),
            self.fetch_search(query.trim()),
        );

        let sources: Vec<SupplementarySource> = portfolio
            .map(SupplementarySource::Portfolio)
            .into_iter()
            .chain(search.map(SupplementarySource::LiveSearch))
            .collect();

        if sources.is_empty() {
            info!("No supplementary data available, conversation left unchanged");
            return conversation;
        }

        let account_name = identifiers.and_then(|ids| ids.account_name.as_deref());
        let fused_text = build_fused_text(&query, &sources, account_name);

        info!(
            sources = sources.len(),
            fused_chars = fused_text.chars().count(),
            "Fused supplementary data into last turn"
        );

        replace_last_turn_text(conversation, fused_text)
    }

    async fn fetch_portfolio(
        &self,
        identifiers: Option<&ContextIdentifiers>,
        flags: &FusionFlags,
    ) -> Option<Value> {
        let ids = identifiers.filter(|ids| ids.is_complete())?;
        let (Some(client_id), Some(banker_id), Some(firm_name)) = (
            ids.client_id.as_deref(),
            ids.banker_id.as_deref(),
            ids.firm_name.as_deref(),
        ) else {
            return None;
        };

        match self
            .portfolio
            .fetch(client_id, banker_id, firm_name, flags.portfolio_type)
            .await
        {
            Ok(data) => Some(data),
            Err(e) => {
                warn!(error = %e, "Portfolio fetch failed, continuing without portfolio context");
                None
            }
        }
    }

    async fn fetch_search(&self, query: &str) -> Option<SearchResult> {
        if query.is_empty() {
            debug!("Empty query, skipping live search");
            return None;
        }

        match self.search.search(query).await {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(error = %e, "Live search failed, continuing without search context");
                None
            }
        }
    }
}

/// Render the portfolio blob as pretty JSON cut to the character budget.
pub fn render_portfolio(data: &Value) -> String {
    let rendered = serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string());
    truncate_chars(&rendered, PORTFOLIO_CHAR_BUDGET)
}

/// Query, then portfolio section, then search section, then instructions.
fn build_fused_text(
    query: &str,
    sources: &[SupplementarySource],
    account_name: Option<&str>,
) -> String {
    let mut portfolio_section = None;
    let mut search_section = None;

    for source in sources {
        match source {
            SupplementarySource::Portfolio(data) => {
                let label = account_name
                    .filter(|name| !name.trim().is_empty())
                    .map(|name| format!("Account: {}\n", name.trim()))
                    .unwrap_or_default();
                portfolio_section = Some(format!(
                    "{}\n{}{}\n{}",
                    PORTFOLIO_HEADER,
                    label,
                    render_portfolio(data),
                    PORTFOLIO_FOOTER
                ));
            }
            SupplementarySource::LiveSearch(result) => {
                search_section = Some(format!(
                    "{}\n{}\n\nSources: {} citation(s)\n{}",
                    SEARCH_HEADER,
                    result.content.trim(),
                    result.citations.len(),
                    SEARCH_FOOTER
                ));
            }
        }
    }

    let instruction = match (&portfolio_section, &search_section) {
        (Some(_), Some(_)) => {
            "Instructions: Use the portfolio data and the live search results above. \
             Combine them: relate current market information to the client's holdings."
        }
        (Some(_), None) => {
            "Instructions: Use the portfolio data above to answer the question."
        }
        (None, Some(_)) => {
            "Instructions: Use the live search results above to answer the question \
             with current information."
        }
        (None, None) => "",
    };

    let mut out = query.to_string();
    for section in [portfolio_section, search_section].into_iter().flatten() {
        out.push_str("\n\n");
        out.push_str(&section);
    }
    if !instruction.is_empty() {
        out.push_str("\n\n");
        out.push_str(instruction);
    }
    out
}

/// Swap the last turn's text for `text`, keeping binary parts untouched.
fn replace_last_turn_text(
    mut conversation: Vec<ConversationTurn>,
    text: String,
) -> Vec<ConversationTurn> {
    let Some(last) = conversation.last_mut() else {
        return conversation;
    };

    last.content = match std::mem::replace(&mut last.content, MessageContent::Text(String::new()))
    {
        MessageContent::Text(_) => MessageContent::Text(text),
        MessageContent::Parts(parts) => {
            let mut fused = Some(text);
            let mut out = Vec::with_capacity(parts.len() + 1);

            for part in parts {
                match part {
                    // The first text part takes the fused text; the rest are
                    // already folded into the query.
                    ContentPart::Text { .. } => {
                        if let Some(text) = fused.take() {
                            out.push(ContentPart::Text { text });
                        }
                    }
                    binary @ ContentPart::Binary { .. } => out.push(binary),
                }
            }

            if let Some(text) = fused {
                out.insert(0, ContentPart::Text { text });
            }
            MessageContent::Parts(out)
        }
    };

    conversation
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::models::{Citation, PortfolioType, Role};
    use crate::Result;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    struct FakePortfolio {
        data: Option<Value>,
        calls: AtomicU32,
    }

    impl FakePortfolio {
        fn returning(data: Option<Value>) -> Arc<Self> {
            Arc::new(Self {
                data,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl PortfolioSource for FakePortfolio {
        async fn fetch(
            &self,
            _client_id: &str,
            _banker_id: &str,
            _firm_name: &str,
            _portfolio_type: PortfolioType,
        ) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.data.clone().ok_or_else(|| PipelineError::from_status("portfolio", 503, "down"))
        }
    }

    struct FakeSearch {
        result: Option<SearchResult>,
        queries: std::sync::Mutex<Vec<String>>,
    }

    impl FakeSearch {
        fn returning(result: Option<SearchResult>) -> Arc<Self> {
            Arc::new(Self {
                result,
                queries: std::sync::Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LiveSearch for FakeSearch {
        async fn search(&self, query: &str) -> Result<SearchResult> {
            self.queries.lock().unwrap().push(query.to_string());
            self.result.clone().ok_or(PipelineError::RateLimited { service: "live-search" })
        }
    }

    fn complete_ids() -> ContextIdentifiers {
        ContextIdentifiers {
            client_id: Some("C-1".into()),
            banker_id: Some("B-9".into()),
            firm_name: Some("Acme".into()),
            account_name: Some("Growth Fund".into()),
        }
    }

    fn search_result() -> SearchResult {
        SearchResult {
            content: "Tech stocks rallied today.".into(),
            citations: vec![
                Citation { title: "A".into(), url: "https://a.example".into() },
                Citation { title: "B".into(), url: "https://b.example".into() },
            ],
        }
    }

    fn live() -> FusionFlags {
        FusionFlags {
            include_live_data: true,
            ..FusionFlags::default()
        }
    }

    fn conversation() -> Vec<ConversationTurn> {
        vec![
            ConversationTurn::user("Hi"),
            ConversationTurn::assistant("Hello, how can I help?"),
            ConversationTurn::user("How is my portfolio doing?"),
        ]
    }

    #[tokio::test]
    async fn test_disabled_flag_passes_through() {
        let portfolio = FakePortfolio::returning(Some(json!({"x": 1})));
        let search = FakeSearch::returning(Some(search_result()));
        let engine = ContextFusionEngine::new(portfolio.clone(), search.clone());

        let fused = engine
            .augment(conversation(), Some(&complete_ids()), &FusionFlags::default())
            .await;

        assert_eq!(fused, conversation());
        assert_eq!(portfolio.calls.load(Ordering::SeqCst), 0);
        assert!(search.queries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_both_sources_fail_passes_through() {
        let engine = ContextFusionEngine::new(
            FakePortfolio::returning(None),
            FakeSearch::returning(None),
        );

        let fused = engine.augment(conversation(), Some(&complete_ids()), &live()).await;
        assert_eq!(fused, conversation());
    }

    #[tokio::test]
    async fn test_both_sources_fused_in_order() {
        let engine = ContextFusionEngine::new(
            FakePortfolio::returning(Some(json!({"holdings": [{"ticker": "AAPL"}]}))),
            FakeSearch::returning(Some(search_result())),
        );

        let fused = engine.augment(conversation(), Some(&complete_ids()), &live()).await;
        let text = fused.last().unwrap().content.plain_text();

        assert!(text.starts_with("How is my portfolio doing?\n\n"));
        let portfolio_at = text.find(PORTFOLIO_HEADER).unwrap();
        let search_at = text.find(SEARCH_HEADER).unwrap();
        assert!(portfolio_at < search_at);
        assert!(text.contains("Account: Growth Fund"));
        assert!(text.contains("Sources: 2 citation(s)"));
        assert!(text.contains("Combine them"));
        assert_eq!(fused[..2], conversation()[..2]);
    }

    #[tokio::test]
    async fn test_search_only_instruction() {
        let portfolio = FakePortfolio::returning(Some(json!({})));
        let engine = ContextFusionEngine::new(
            portfolio.clone(),
            FakeSearch::returning(Some(search_result())),
        );

        let incomplete = ContextIdentifiers {
            firm_name: None,
            ..complete_ids()
        };
        let fused = engine.augment(conversation(), Some(&incomplete), &live()).await;
        let text = fused.last().unwrap().content.plain_text();

        assert_eq!(portfolio.calls.load(Ordering::SeqCst), 0);
        assert!(!text.contains(PORTFOLIO_HEADER));
        assert!(text.contains("Use the live search results above"));
        assert!(!text.contains("Combine them"));
    }

    #[tokio::test]
    async fn test_portfolio_truncated_to_budget() {
        let big = json!({ "notes": "x".repeat(10_000) });
        let rendered = render_portfolio(&big);
        assert_eq!(rendered.chars().count(), PORTFOLIO_CHAR_BUDGET);

        let engine = ContextFusionEngine::new(
            FakePortfolio::returning(Some(big)),
            FakeSearch::returning(None),
        );
        let fused = engine.augment(conversation(), Some(&complete_ids()), &live()).await;
        let text = fused.last().unwrap().content.plain_text();

        assert!(text.contains(&format!("{}\n{}", rendered, PORTFOLIO_FOOTER)));
        assert!(text.contains("Use the portfolio data above"));
    }

    #[tokio::test]
    async fn test_binary_part_preserved_and_text_replaced() {
        let engine = ContextFusionEngine::new(
            FakePortfolio::returning(None),
            FakeSearch::returning(Some(search_result())),
        );

        let binary = ContentPart::Binary {
            media_type: "image/png".into(),
            data: "iVBORw0KGgo=".into(),
        };
        let turns = vec![ConversationTurn {
            role: Role::User,
            content: MessageContent::Parts(vec![
                binary.clone(),
                ContentPart::Text { text: "What is in".into() },
                ContentPart::Text { text: "this chart?".into() },
            ]),
        }];

        let fused = engine.augment(turns, None, &live()).await;

        let MessageContent::Parts(parts) = &fused[0].content else {
            panic!("structured content expected");
        };
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], binary);
        match &parts[1] {
            ContentPart::Text { text } => {
                assert!(text.starts_with("What is in\nthis chart?"));
                assert!(text.contains(SEARCH_HEADER));
            }
            other => panic!("unexpected part: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_text_part_inserted_when_missing() {
        let search = FakeSearch::returning(Some(search_result()));
        let engine =
            ContextFusionEngine::new(FakePortfolio::returning(Some(json!({"a": 1}))), search.clone());

        let binary = ContentPart::Binary {
            media_type: "application/pdf".into(),
            data: "JVBERi0=".into(),
        };
        let turns = vec![ConversationTurn {
            role: Role::User,
            content: MessageContent::Parts(vec![binary.clone()]),
        }];

        let fused = engine.augment(turns, Some(&complete_ids()), &live()).await;

        // No query text, so only the portfolio is fetched.
        assert!(search.queries.lock().unwrap().is_empty());
        let MessageContent::Parts(parts) = &fused[0].content else {
            panic!("structured content expected");
        };
        assert_eq!(parts.len(), 2);
        assert!(matches!(&parts[0], ContentPart::Text { text } if text.contains(PORTFOLIO_HEADER)));
        assert_eq!(parts[1], binary);
    }

    #[tokio::test]
    async fn test_query_kept_verbatim_in_fused_turn() {
        let search = FakeSearch::returning(Some(search_result()));
        let engine = ContextFusionEngine::new(FakePortfolio::returning(None), search.clone());

        let turns = vec![ConversationTurn::user("  - nested item\n")];
        let fused = engine.augment(turns, None, &live()).await;

        assert_eq!(*search.queries.lock().unwrap(), vec!["- nested item".to_string()]);
        let text = fused[0].content.plain_text();
        assert!(text.starts_with("  - nested item\n\n\n"));
    }

    /// Portfolio that cannot finish until the search has been issued.
    struct GatedPortfolio {
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl PortfolioSource for GatedPortfolio {
        async fn fetch(
            &self,
            _client_id: &str,
            _banker_id: &str,
            _firm_name: &str,
            _portfolio_type: PortfolioType,
        ) -> Result<Value> {
            self.gate.notified().await;
            tokio::time::sleep(Duration::from_millis(20)).await;
            Err(PipelineError::from_status("portfolio", 504, "slow"))
        }
    }

    struct GateOpeningSearch {
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl LiveSearch for GateOpeningSearch {
        async fn search(&self, _query: &str) -> Result<SearchResult> {
            self.gate.notify_one();
            Ok(search_result())
        }
    }

    #[tokio::test]
    async fn test_fetches_run_concurrently() {
        let gate = Arc::new(Notify::new());
        let engine = ContextFusionEngine::new(
            Arc::new(GatedPortfolio { gate: gate.clone() }),
            Arc::new(GateOpeningSearch { gate }),
        );

        let fused = tokio::time::timeout(
            Duration::from_secs(2),
            engine.augment(conversation(), Some(&complete_ids()), &live()),
        )
        .await
        .expect("portfolio fetch blocked the search");

        let text = fused.last().unwrap().content.plain_text();
        assert!(text.contains(SEARCH_HEADER));
        assert!(!text.contains(PORTFOLIO_HEADER));
    }

    #[tokio::test]
    async fn test_fusion_is_deterministic() {
        let engine = ContextFusionEngine::new(
            FakePortfolio::returning(Some(json!({"b": 2, "a": [1, 2, 3]}))),
            FakeSearch::returning(Some(search_result())),
        );

        let first = engine.augment(conversation(), Some(&complete_ids()), &live()).await;
        let second = engine.augment(conversation(), Some(&complete_ids()), &live()).await;

        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }
}
