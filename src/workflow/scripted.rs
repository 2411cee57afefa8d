//! Deterministic offline crew.
//!
//! Resolves the location from the query, "researches" a fixed catalogue of
//! restaurants shaped by the requested cuisine, and writes recommendation
//! text from it. Feedback either keeps the list (approval) or reshapes it by
//! price.

use std::fmt::Write as _;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::parse::{
    chunk_text, fallback_recommendations, infer_cuisine, infer_location, is_acceptance,
    parse_restaurants, render_restaurants, wants_budget, wants_upscale,
};
use super::{
    Job, Notification, Notifier, Task, Verdict, WorkflowEngine, WorkflowError, WorkflowOutcome,
    checkpoint,
};
use crate::state::Restaurant;

const CHUNK_LEN: usize = 48;

/// `(name template, price, rating)`; `{c}` is the cuisine, `{p}` the place.
const CATALOGUE: &[(&str, &str, f64)] = &[
    ("The {p} {c} Table", "$$$", 4.6),
    ("{c} Corner", "$", 4.2),
    ("Little {c} Kitchen", "$$", 4.4),
    ("Maison {p}", "$$$$", 4.8),
    ("{c} Street Eats", "$", 4.1),
    ("Golden Fork", "$$", 4.3),
];

#[derive(Debug, Clone, Default)]
pub struct ScriptedCrew {
    step_delay: Duration,
}

impl ScriptedCrew {
    #[must_use]
    pub fn new(step_delay: Duration) -> Self {
        Self { step_delay }
    }

    fn pause(&self) {
        if !self.step_delay.is_zero() {
            std::thread::sleep(self.step_delay);
        }
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
        let cuisine = infer_cuisine(query);
        notifier.notify(Notification::LocationResolved(location.clone()))?;
        notifier.tool(
            "search_restaurants",
            json!({ "location": location, "query": query }),
        )?;

        let report = render_restaurants(&catalogue(&location, cuisine.as_deref()));
        let restaurants = parse_restaurants(&report);
        debug!(name: "crew.search.researched", count = restaurants.len(), %location, "Research complete");

        let total = restaurants.len().max(1) as f64;
        for (i, r) in restaurants.iter().enumerate() {
            self.pause();
            checkpoint(cancel)?;
            notifier.notify(Notification::RestaurantFound(r.clone()))?;
            notifier.progress(Task::Search, (i + 1) as f64 / total)?;
        }

        checkpoint(cancel)?;
        notifier.phase(Task::Recommend)?;
        notifier.tool(
            "present_recommendations",
            json!({ "location": location, "count": restaurants.len() }),
        )?;

        let text = recommendation_text(&location, cuisine.as_deref(), &restaurants);
        self.stream_text(&text, Task::Recommend, notifier, cancel)?;

        Ok(WorkflowOutcome {
            recommendations: text,
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

        let place = place(location);
        let prior = if prior_recommendations.trim().is_empty() {
            fallback_recommendations(location, &prior_restaurants)
        } else {
            prior_recommendations.to_string()
        };

        let (text, restaurants, verdict) = if is_acceptance(feedback) {
            let text = format!(
                "Thank you for your feedback! I'm glad you liked the recommendations for {place}. \
                 Here they are again:\n\n{prior}"
            );
            (text, prior_restaurants, Verdict::Accepted)
        } else {
            let revised = revise(location, feedback, prior_restaurants);
            let mut text = format!(
                "Based on your feedback (\"{feedback}\"), here are updated recommendations for {place}:\n\n"
            );
            text.push_str(&listing(&revised));
            (text, revised, Verdict::Revised)
        };

        self.stream_text(&text, Task::Feedback, notifier, cancel)?;

        Ok(WorkflowOutcome {
            recommendations: text,
            restaurants,
            verdict,
        })
    }

    fn stream_text(
        &self,
        text: &str,
        task: Task,
        notifier: &Notifier,
        cancel: &CancellationToken,
    ) -> Result<(), WorkflowError> {
        let chunks = chunk_text(text, CHUNK_LEN);
        let total = chunks.len().max(1) as f64;
        for (i, chunk) in chunks.into_iter().enumerate() {
            checkpoint(cancel)?;
            notifier.text(chunk)?;
            notifier.progress(task, (i + 1) as f64 / total)?;
        }
        notifier.notify(Notification::TextEnd)
    }
}

impl WorkflowEngine for ScriptedCrew {
    fn name(&self) -> &'static str {
        "scripted"
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

fn place(location: &str) -> &str {
    if location.is_empty() {
        "your area"
    } else {
        location
    }
}

fn catalogue(location: &str, cuisine: Option<&str>) -> Vec<Restaurant> {
    let c = cuisine.unwrap_or("Local");
    let p = place(location);
    let city = location.split(',').next().unwrap_or(p).trim();
    let city = if city.is_empty() { "Downtown" } else { city };

    CATALOGUE
        .iter()
        .enumerate()
        .map(|(i, (template, price, rating))| {
            let name = template.replace("{c}", c).replace("{p}", city);
            let mut r = Restaurant::new(format!("rest_{i}"), name);
            r.cuisine = Some(c.to_string());
            r.price_range = (*price).to_string();
            r.rating = Some(*rating);
            r.address = format!("{} Main St, {p}", 100 + i * 17);
            r
        })
        .collect()
}

fn price_level(r: &Restaurant) -> usize {
    r.price_range.chars().filter(|c| *c == '$').count()
}

fn by_rating(a: &Restaurant, b: &Restaurant) -> std::cmp::Ordering {
    b.rating
        .unwrap_or(0.0)
        .total_cmp(&a.rating.unwrap_or(0.0))
}

/// Reshape the list to match the feedback.
fn revise(location: &str, feedback: &str, prior: Vec<Restaurant>) -> Vec<Restaurant> {
    let pool = if prior.is_empty() {
        catalogue(location, infer_cuisine(feedback).as_deref())
    } else {
        prior
    };

    let mut picks: Vec<Restaurant> = if wants_budget(feedback) {
        pool.into_iter().filter(|r| price_level(r) <= 2).collect()
    } else if wants_upscale(feedback) {
        pool.into_iter().filter(|r| price_level(r) >= 3).collect()
    } else {
        pool
    };

    if wants_budget(feedback) {
        picks.sort_by(|a, b| price_level(a).cmp(&price_level(b)).then_with(|| by_rating(a, b)));
    } else {
        picks.sort_by(by_rating);
    }
    picks
}

fn listing(restaurants: &[Restaurant]) -> String {
    let mut out = String::new();
    for (i, r) in restaurants.iter().enumerate() {
        let rating = r.rating.map_or_else(String::new, |v| format!(", {v:.1}/5"));
        let _ = writeln!(
            out,
            "{}. **{}** ({}{rating}) - {}",
            i + 1,
            r.name,
            r.price_range,
            r.address
        );
    }
    if restaurants.is_empty() {
        out.push_str("I couldn't find places matching that request; try a broader description.\n");
    }
    out
}

fn recommendation_text(location: &str, cuisine: Option<&str>, restaurants: &[Restaurant]) -> String {
    let mut top: Vec<Restaurant> = restaurants.to_vec();
    top.sort_by(by_rating);
    top.truncate(3);

    let what = cuisine.map_or_else(|| "restaurants".to_string(), |c| format!("{c} restaurants"));
    let mut text = format!("Here are my top picks for {what} in {}:\n\n", place(location));
    text.push_str(&listing(&top));
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn run_collect(job: Job) -> (Vec<Notification>, Result<WorkflowOutcome, WorkflowError>) {
        let (tx, mut rx) = mpsc::channel(1024);
        let notifier = Notifier::new(tx);
        let result = ScriptedCrew::default().run(job, &notifier, &CancellationToken::new());
        drop(notifier);
        let mut seen = Vec::new();
        while let Ok(n) = rx.try_recv() {
            seen.push(n);
        }
        (seen, result)
    }

    #[test]
    fn test_search_reports_in_order() {
        let (seen, result) = run_collect(Job::Search {
            query: "Find Italian restaurants in Chicago".into(),
        });
        let outcome = result.unwrap();

        assert_eq!(seen[0], Notification::PhaseStarted(Task::Search));
        assert_eq!(seen[1], Notification::LocationResolved("Chicago".into()));
        assert!(matches!(&seen[2], Notification::ToolInvoked { name, .. } if name == "search_restaurants"));

        let recommend_at = seen
            .iter()
            .position(|n| *n == Notification::PhaseStarted(Task::Recommend))
            .unwrap();
        let found = seen[..recommend_at]
            .iter()
            .filter(|n| matches!(n, Notification::RestaurantFound(_)))
            .count();
        assert_eq!(found, CATALOGUE.len());
        assert_eq!(seen.last(), Some(&Notification::TextEnd));

        assert_eq!(outcome.restaurants.len(), CATALOGUE.len());
        assert!(outcome.recommendations.contains("Italian restaurants in Chicago"));
        assert_eq!(outcome.restaurants[1].name, "Italian Corner");
    }

    #[test]
    fn test_budget_feedback_revises() {
        let prior = catalogue("Chicago", Some("Italian"));
        let (_, result) = run_collect(Job::Feedback {
            feedback: "More budget-friendly options".into(),
            location: "Chicago".into(),
            prior_recommendations: "old".into(),
            prior_restaurants: prior,
        });
        let outcome = result.unwrap();
        assert_eq!(outcome.verdict, Verdict::Revised);
        assert!(outcome.restaurants.iter().all(|r| price_level(r) <= 2));
        assert_eq!(outcome.restaurants[0].price_range, "$");
        assert!(outcome.recommendations.contains("More budget-friendly options"));
    }

    #[test]
    fn test_approval_keeps_prior_text() {
        let (_, result) = run_collect(Job::Feedback {
            feedback: "Thanks, these look perfect".into(),
            location: String::new(),
            prior_recommendations: String::new(),
            prior_restaurants: Vec::new(),
        });
        let outcome = result.unwrap();
        assert_eq!(outcome.verdict, Verdict::Accepted);
        assert!(outcome.recommendations.starts_with("Thank you for your feedback!"));
        assert!(outcome.recommendations.contains("your selected location"));
    }

    #[test]
    fn test_cancelled_before_start() {
        let (tx, _rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = ScriptedCrew::default().run(
            Job::Search { query: "q".into() },
            &Notifier::new(tx),
            &cancel,
        );
        assert_eq!(result, Err(WorkflowError::Cancelled));
    }
}
