//! Text helpers shared by the crews.
//!
//! Research output uses a loose markdown layout, one block per restaurant:
//!
//! ```text
//! **Restaurant Name**: Alinea
//! **Cuisine**: Modern American
//! **Price Range**: $$$$
//! **Ratings**: 4.8/5
//! **Address**: 1723 N Halsted St, Chicago
//! ```

use std::fmt::Write as _;

use crate::state::Restaurant;

/// Cuisines recognised in free-text queries.
const CUISINES: &[&str] = &[
    "italian", "japanese", "sushi", "ramen", "mexican", "thai", "indian", "chinese", "french",
    "korean", "vietnamese", "greek", "spanish", "mediterranean", "american", "bbq", "vegan",
    "seafood", "pizza", "steak",
];

/// Words and phrases in feedback that mean the user is happy with what they got.
const ACCEPTANCE: &[&[&str]] = &[
    &["thank"],
    &["thanks"],
    &["great"],
    &["perfect"],
    &["love"],
    &["look", "good"],
    &["looks", "good"],
];

/// Words that flip an otherwise approving reply.
const NEGATION: &[&str] = &["no", "not", "don't", "dont", "isn't", "aren't", "but"];

/// Guess the location from a query such as "Find Italian restaurants in Chicago".
///
/// Falls back to the whole query, which is what the user typed as a location.
#[must_use]
pub fn infer_location(query: &str) -> String {
    let trimmed = query.trim();
    let lower = trimmed.to_ascii_lowercase();

    let start = [" in ", " near ", " around "]
        .iter()
        .filter_map(|sep| lower.rfind(sep).map(|pos| pos + sep.len()))
        .max();

    let candidate = match start {
        Some(pos) => &trimmed[pos..],
        None => trimmed,
    };
    candidate
        .trim_end_matches(|c: char| c == '?' || c == '!' || c == '.' || c.is_whitespace())
        .trim()
        .to_string()
}

/// First cuisine named in `query`, capitalised.
#[must_use]
pub fn infer_cuisine(query: &str) -> Option<String> {
    let lower = query.to_lowercase();
    CUISINES
        .iter()
        .find(|c| lower.split(|ch: char| !ch.is_alphanumeric()).any(|w| w == **c))
        .map(|c| capitalize(c))
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

/// True when the feedback reads as approval.
///
/// Matches whole words only. Any negation, or a request for cheaper or
/// fancier places, means the user still wants changes.
#[must_use]
pub fn is_acceptance(feedback: &str) -> bool {
    if wants_budget(feedback) || wants_upscale(feedback) {
        return false;
    }
    let lower = feedback.to_lowercase().replace('\u{2019}', "'");
    let words: Vec<&str> = lower
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|w| !w.is_empty())
        .collect();
    if words.iter().any(|w| NEGATION.contains(w)) {
        return false;
    }
    ACCEPTANCE
        .iter()
        .any(|phrase| words.windows(phrase.len()).any(|w| w == *phrase))
}

/// True when the feedback asks for cheaper places.
#[must_use]
pub fn wants_budget(feedback: &str) -> bool {
    let lower = feedback.to_lowercase();
    ["budget", "cheap", "affordable", "inexpensive"]
        .iter()
        .any(|w| lower.contains(w))
}

/// True when the feedback asks for fancier places.
#[must_use]
pub fn wants_upscale(feedback: &str) -> bool {
    let lower = feedback.to_lowercase();
    ["upscale", "fancy", "fine dining", "luxur", "special occasion"]
        .iter()
        .any(|w| lower.contains(w))
}

/// Parse restaurant blocks out of research text. Ids are `rest_<n>` by position.
#[must_use]
pub fn parse_restaurants(text: &str) -> Vec<Restaurant> {
    let mut found: Vec<Restaurant> = Vec::new();
    let mut current: Option<Restaurant> = None;

    for line in text.lines() {
        let line = line.trim();
        let line = line
            .strip_prefix("- ")
            .or_else(|| line.strip_prefix("* "))
            .unwrap_or(line);
        let line = line
            .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.')
            .trim_start();

        if let Some(name) = field(line, "Restaurant Name") {
            if let Some(done) = current.take() {
                found.push(done);
            }
            if !name.is_empty() {
                current = Some(Restaurant::new(format!("rest_{}", found.len()), name));
            }
            continue;
        }

        let Some(r) = current.as_mut() else {
            continue;
        };
        if let Some(v) = field(line, "Cuisine") {
            r.cuisine = Some(v.to_string());
        } else if let Some(v) = field(line, "Price Range") {
            r.price_range = v.to_string();
        } else if let Some(v) = field(line, "Ratings").or_else(|| field(line, "Rating")) {
            r.rating = parse_rating(v);
        } else if let Some(v) = field(line, "Address") {
            r.address = v.to_string();
        }
    }

    if let Some(done) = current {
        found.push(done);
    }
    found
}

/// Value of a `**Label**: value` line.
fn field<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    let rest = line.strip_prefix("**")?.strip_prefix(label)?;
    let rest = rest
        .strip_prefix("**:")
        .or_else(|| rest.strip_prefix(":**"))?;
    Some(rest.trim())
}

/// Leading number of "4.5/5", "4.5 stars" or "4.5".
fn parse_rating(raw: &str) -> Option<f64> {
    let end = raw
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(raw.len());
    raw[..end].parse::<f64>().ok().filter(|r| r.is_finite())
}

/// Render restaurants in the research layout [`parse_restaurants`] reads.
#[must_use]
pub fn render_restaurants(restaurants: &[Restaurant]) -> String {
    let mut out = String::new();
    for r in restaurants {
        let _ = writeln!(out, "**Restaurant Name**: {}", r.name);
        if let Some(c) = &r.cuisine {
            let _ = writeln!(out, "**Cuisine**: {c}");
        }
        if !r.price_range.is_empty() {
            let _ = writeln!(out, "**Price Range**: {}", r.price_range);
        }
        if let Some(rating) = r.rating {
            let _ = writeln!(out, "**Ratings**: {rating:.1}/5");
        }
        if !r.address.is_empty() {
            let _ = writeln!(out, "**Address**: {}", r.address);
        }
        out.push('\n');
    }
    out
}

/// Recommendation text built from the restaurant list alone.
///
/// Used when a resumed run has no recommendation text to refer back to.
#[must_use]
pub fn fallback_recommendations(location: &str, restaurants: &[Restaurant]) -> String {
    let place = if location.is_empty() {
        "your selected location"
    } else {
        location
    };

    let mut out = format!("Recommendations for restaurants in {place}:\n\n");
    if restaurants.is_empty() {
        for (i, line) in [
            "Top-rated restaurants - Various cuisines, $$-$$$",
            "Local favorites - Regional specialties, $$-$$$",
            "Hidden gems - Unique dining experiences, $$",
        ]
        .iter()
        .enumerate()
        {
            let _ = writeln!(out, "{}. **{line}**", i + 1);
        }
        return out;
    }

    for r in restaurants {
        let cuisine = r.cuisine.as_deref().unwrap_or("Various");
        let price = if r.price_range.is_empty() {
            "price n/a"
        } else {
            r.price_range.as_str()
        };
        let rating = r
            .rating
            .map_or_else(|| "n/a".to_string(), |v| format!("{v:.1}"));
        let _ = writeln!(
            out,
            "- **{}**: {cuisine} cuisine, {price}, Rating: {rating}",
            r.name
        );
    }
    out
}

/// Split text into streaming-sized pieces on word boundaries.
#[must_use]
pub fn chunk_text(text: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();

    for word in text.split_inclusive(' ') {
        if !current.is_empty() && current.len() + word.len() > max_len {
            chunks.push(std::mem::take(&mut current));
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_location() {
        assert_eq!(infer_location("Find Italian restaurants in Chicago"), "Chicago");
        assert_eq!(infer_location("sushi near Shibuya, Tokyo?"), "Shibuya, Tokyo");
        assert_eq!(infer_location("Seattle"), "Seattle");
        assert_eq!(infer_location("  "), "");
    }

    #[test]
    fn test_infer_cuisine() {
        assert_eq!(
            infer_cuisine("Find Italian restaurants in Chicago").as_deref(),
            Some("Italian")
        );
        assert_eq!(infer_cuisine("Dinner in Austin"), None);
    }

    #[test]
    fn test_acceptance() {
        assert!(is_acceptance("Thanks for the recommendations! These look perfect."));
        assert!(is_acceptance("great"));
        assert!(is_acceptance("Looks good"));
        assert!(!is_acceptance("More budget-friendly options"));
        assert!(wants_budget("More budget-friendly options"));
        assert!(wants_upscale("Show me more upscale choices"));
    }

    #[test]
    fn test_declined_thanks_is_not_acceptance() {
        assert!(!is_acceptance("No thanks, cheaper please"));
        assert!(!is_acceptance("Not great, try again"));
        assert!(!is_acceptance("I don't love these"));
        assert!(!is_acceptance("Greatness is overrated, show me others"));
        assert!(!is_acceptance("Thank you, but something fancier"));
        assert!(!is_acceptance("Lovely, a different neighborhood this time"));
    }

    #[test]
    fn test_parse_restaurant_blocks() {
        let text = "\
Here is what I found:

1. **Restaurant Name**: Alinea
   **Cuisine**: Modern American
   **Price Range**: $$$$
   **Ratings**: 4.8/5
   **Address**: 1723 N Halsted St, Chicago

- **Restaurant Name:** Lou Malnati's
- **Cuisine:** Pizza
- **Ratings:** 4.5 stars
";
        let found = parse_restaurants(text);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, "rest_0");
        assert_eq!(found[0].name, "Alinea");
        assert_eq!(found[0].price_range, "$$$$");
        assert_eq!(found[0].rating, Some(4.8));
        assert_eq!(found[0].address, "1723 N Halsted St, Chicago");
        assert_eq!(found[1].id, "rest_1");
        assert_eq!(found[1].cuisine.as_deref(), Some("Pizza"));
        assert_eq!(found[1].rating, Some(4.5));
    }

    #[test]
    fn test_render_is_parseable() {
        let mut r = Restaurant::new("rest_0", "Girl & the Goat");
        r.cuisine = Some("American".into());
        r.price_range = "$$$".into();
        r.rating = Some(4.6);
        let parsed = parse_restaurants(&render_restaurants(&[r.clone()]));
        assert_eq!(parsed, vec![r]);
    }

    #[test]
    fn test_fallback_recommendations() {
        let text = fallback_recommendations("", &[]);
        assert!(text.contains("your selected location"));

        let mut r = Restaurant::new("rest_0", "Alinea");
        r.rating = Some(4.8);
        let text = fallback_recommendations("Chicago", &[r]);
        assert!(text.contains("- **Alinea**: Various cuisine, price n/a, Rating: 4.8"));
    }

    #[test]
    fn test_chunk_text() {
        let chunks = chunk_text("one two three four", 8);
        assert_eq!(chunks.concat(), "one two three four");
        assert!(chunks.iter().all(|c| c.len() <= 8));
    }
}
