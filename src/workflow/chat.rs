//! Crew backed by an OpenAI-compatible chat model.
//!
//! Three specialists, one prompt each: research (restaurant blocks), the
//! recommendation writer, and the feedback responder. Model text for the
//! last two is streamed to the client as it arrives.

use futures::StreamExt;
use serde_json::json;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::parse::{
    chunk_text, fallback_recommendations, infer_location, is_acceptance, parse_restaurants,
    render_restaurants,
};
use super::{
    Job, Notification, Notifier, Task, Verdict, WorkflowEngine, WorkflowError, WorkflowOutcome,
    checkpoint,
};
use crate::llm::{ChatCompletionsClient, ChatDelta, ChatMessage, LlmSettings};
use crate::state::Restaurant;

const RESEARCH_PROMPT: &str = "You are a restaurant research specialist. List 5 to 8 real \
restaurants that match the request, located in the given location only. For each one write \
exactly these lines:\n**Restaurant Name**: <name>\n**Cuisine**: <cuisine>\n**Price Range**: \
<$ to $$$$>\n**Ratings**: <rating>/5\n**Address**: <street address>\nSeparate restaurants with \
a blank line. Do not add commentary.";

const RECOMMEND_PROMPT: &str = "You are a friendly dining recommendation specialist. Using only \
the researched restaurants provided, recommend the best three for the user's request and explain \
briefly why. Mention the location by name. Use markdown.";

const FEEDBACK_PROMPT: &str = "You are a dining recommendation specialist revising earlier \
recommendations after user feedback. Keep every restaurant in the original location. Address \
the feedback directly and present the revised list in markdown.";

#[derive(Debug, Clone)]
pub struct ChatCrew {
    client: ChatCompletionsClient,
    handle: Handle,
}

impl ChatCrew {
    /// `handle` drives HTTP requests from the blocking worker.
    #[must_use]
    pub fn new(settings: LlmSettings, handle: Handle) -> Self {
        Self {
            client: ChatCompletionsClient::new(settings),
            handle,
        }
    }

    /// Run one prompt to completion, forwarding text to `live` as it streams.
    ///
    /// Each chunk is awaited on the runtime and then forwarded from this
    /// thread, so blocking sends never happen inside the runtime.
    fn ask(
        &self,
        messages: &[ChatMessage],
        live: Option<&Notifier>,
        cancel: &CancellationToken,
    ) -> Result<String, WorkflowError> {
        let mut stream = self
            .handle
            .block_on(async {
                tokio::select! {
                    () = cancel.cancelled() => Err(WorkflowError::Cancelled),
                    opened = self.client.stream(messages) => opened.map_err(model_error),
                }
            })?;

        let mut full = String::new();
        loop {
            let next = self.handle.block_on(async {
                tokio::select! {
                    () = cancel.cancelled() => Err(WorkflowError::Cancelled),
                    item = stream.next() => Ok(item),
                }
            })?;

            match next {
                Some(Ok(ChatDelta::Text(s))) => {
                    if let Some(notifier) = live {
                        notifier.text(s.clone())?;
                    }
                    full.push_str(&s);
                }
                Some(Ok(ChatDelta::Done)) | None => break,
                Some(Err(e)) => return Err(model_error(e)),
            }
        }
        Ok(full)
    }

    fn search(
        &self,
        query: &str,
        notifier: &Notifier,
        cancel: &CancellationToken,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        checkpoint(cancel)?;
        notifier.phase(Task::Search)?;

        let location = infer_location(query);
        notifier.notify(Notification::LocationResolved(location.clone()))?;
        notifier.tool(
            "search_restaurants",
            json!({ "location": location, "query": query }),
        )?;

        let research = self.ask(
            &[
                ChatMessage::system(RESEARCH_PROMPT),
                ChatMessage::user(format!("Request: {query}\nLocation: {location}")),
            ],
            None,
            cancel,
        )?;
        let restaurants = parse_restaurants(&research);
        if restaurants.is_empty() {
            warn!(name: "crew.search.unparsed", %location, "Research returned no restaurant blocks");
        }

        let total = restaurants.len().max(1) as f64;
        for (i, r) in restaurants.iter().enumerate() {
            notifier.notify(Notification::RestaurantFound(r.clone()))?;
            notifier.progress(Task::Search, (i + 1) as f64 / total)?;
        }
        notifier.progress(Task::Search, 1.0)?;

        checkpoint(cancel)?;
        notifier.phase(Task::Recommend)?;
        notifier.tool(
            "present_recommendations",
            json!({ "location": location, "count": restaurants.len() }),
        )?;

        let recommendations = self.ask(
            &[
                ChatMessage::system(RECOMMEND_PROMPT),
                ChatMessage::user(format!(
                    "Request: {query}\nLocation: {location}\n\nResearched restaurants:\n\n{}",
                    render_restaurants(&restaurants)
                )),
            ],
            Some(notifier),
            cancel,
        )?;
        notifier.notify(Notification::TextEnd)?;
        notifier.progress(Task::Recommend, 1.0)?;
        debug!(name: "crew.recommend.finished", chars = recommendations.len(), "Recommendations written");

        Ok(WorkflowOutcome {
            recommendations,
            restaurants,
            verdict: Verdict::Revised,
        })
    }

    fn feedback(
        &self,
        feedback: &str,
        location: &str,
        prior_recommendations: &str,
        prior_restaurants: Vec<Restaurant>,
        notifier: &Notifier,
        cancel: &CancellationToken,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        checkpoint(cancel)?;
        notifier.phase(Task::Feedback)?;
        notifier.tool(
            "respond_to_feedback",
            json!({ "feedback": feedback, "location": location }),
        )?;

        let prior = if prior_recommendations.trim().is_empty() {
            fallback_recommendations(location, &prior_restaurants)
        } else {
            prior_recommendations.to_string()
        };

        // Approval keeps the original list verbatim; no model call.
        if is_acceptance(feedback) {
            let text = format!(
                "Thank you for your feedback! I'm glad you liked the recommendations for {location}. \
                 Here they are again:\n\n{prior}"
            );
            for chunk in chunk_text(&text, 64) {
                checkpoint(cancel)?;
                notifier.text(chunk)?;
            }
            notifier.notify(Notification::TextEnd)?;
            notifier.progress(Task::Feedback, 1.0)?;
            return Ok(WorkflowOutcome {
                recommendations: text,
                restaurants: prior_restaurants,
                verdict: Verdict::Accepted,
            });
        }

        let revised = self.ask(
            &[
                ChatMessage::system(FEEDBACK_PROMPT),
                ChatMessage::user(format!(
                    "Location: {location}\n\nOriginal recommendations:\n{prior}\n\nUser feedback: {feedback}"
                )),
            ],
            Some(notifier),
            cancel,
        )?;
        notifier.notify(Notification::TextEnd)?;
        notifier.progress(Task::Feedback, 1.0)?;

        let mut restaurants = parse_restaurants(&revised);
        if restaurants.is_empty() {
            restaurants = prior_restaurants;
        }

        Ok(WorkflowOutcome {
            recommendations: revised,
            restaurants,
            verdict: Verdict::Revised,
        })
    }
}

fn model_error(e: anyhow::Error) -> WorkflowError {
    WorkflowError::Model(format!("{e:#}"))
}

impl WorkflowEngine for ChatCrew {
    fn name(&self) -> &'static str {
        "chat"
    }

    fn run(
        &self,
        job: Job,
        notifier: &Notifier,
        cancel: &CancellationToken,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        match job {
            Job::Search { query } => self.search(&query, notifier, cancel),
            Job::Feedback {
                feedback,
                location,
                prior_recommendations,
                prior_restaurants,
            } => self.feedback(
                &feedback,
                &location,
                &prior_recommendations,
                prior_restaurants,
                notifier,
                cancel,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Provider;
    use crate::workflow::bridge::{self, BridgeItem};
    use axum::{Router, routing::post};
    use std::sync::Arc;

    const RESEARCH: &str = "**Restaurant Name**: Alinea\n**Cuisine**: Modern American\n\
**Price Range**: $$$$\n**Ratings**: 4.8/5\n\n**Restaurant Name**: Lou Malnati's\n\
**Cuisine**: Pizza\n**Price Range**: $$\n**Ratings**: 4.5/5\n";

    /// Serve every completion as the research text, one line per chunk.
    async fn mock_llm() -> String {
        let mut body = String::new();
        for line in RESEARCH.split_inclusive('\n') {
            let chunk = json!({ "choices": [{ "delta": { "content": line } }] });
            body.push_str(&format!("data: {chunk}\n\n"));
        }
        body.push_str("data: [DONE]\n\n");

        let app = Router::new().route(
            "/v1/chat/completions",
            post(move || {
                let body = body.clone();
                async move { ([("content-type", "text/event-stream")], body) }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn settings(base_url: String) -> LlmSettings {
        LlmSettings {
            provider: Provider::detect_from_url(&base_url),
            base_url,
            api_key: None,
            model: "test-model".into(),
            temperature: None,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_search_against_mock_model() {
        let base_url = mock_llm().await;
        let crew = ChatCrew::new(settings(base_url), Handle::current());

        let mut stream = bridge::spawn(
            Arc::new(crew),
            Job::Search {
                query: "Find pizza in Chicago".into(),
            },
            64,
            CancellationToken::new(),
        );

        let mut found = Vec::new();
        let mut text = String::new();
        let mut outcome = None;
        while let Some(item) = stream.next().await {
            match item {
                BridgeItem::Notice(Notification::RestaurantFound(r)) => found.push(r.name),
                BridgeItem::Notice(Notification::TextChunk(s)) => text.push_str(&s),
                BridgeItem::Finished(o) => outcome = Some(o),
                BridgeItem::Failed(e) => panic!("workflow failed: {e}"),
                BridgeItem::Notice(_) => {}
            }
        }

        assert_eq!(found, ["Alinea", "Lou Malnati's"]);
        assert_eq!(text, RESEARCH);
        let outcome = outcome.unwrap();
        assert_eq!(outcome.recommendations, RESEARCH);
        assert_eq!(outcome.restaurants.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unreachable_model_is_model_error() {
        let crew = ChatCrew::new(settings("http://127.0.0.1:9".into()), Handle::current());
        let mut stream = bridge::spawn(
            Arc::new(crew),
            Job::Search { query: "q".into() },
            8,
            CancellationToken::new(),
        );

        let mut last = None;
        while let Some(item) = stream.next().await {
            last = Some(item);
        }
        assert!(matches!(last, Some(BridgeItem::Failed(WorkflowError::Model(_)))));
    }
}
