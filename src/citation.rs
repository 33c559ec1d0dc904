//! Citation string formatting.

use crate::types::Paper;

/// Format an APA-style citation line for a paper.
///
/// `{authors} ({year}). {title}.` followed by the venue (or publisher when
/// no venue exists), then a DOI link or a retrieval URL. A missing year
/// renders as `n.d.`.
pub fn format_citation(paper: &Paper) -> String {
    let authors = format_authors(&paper.authors);
    let year = paper
        .year
        .map(|y| y.to_string())
        .unwrap_or_else(|| "n.d.".to_string());

    let mut citation = format!("{authors} ({year}). {}.", paper.title);

    if let Some(venue) = non_empty(paper.venue.as_deref()) {
        citation.push_str(&format!(" {venue}."));
    } else if let Some(publisher) = non_empty(paper.publisher.as_deref()) {
        citation.push_str(&format!(" {publisher}."));
    }

    if let Some(doi) = non_empty(paper.doi.as_deref()) {
        citation.push_str(&format!(" https://doi.org/{doi}"));
    } else if let Some(url) = non_empty(paper.url.as_deref()) {
        citation.push_str(&format!(" Retrieved from {url}"));
    }

    citation
}

/// Author rule: none -> "Unknown", one -> the name, two -> "A & B",
/// three or more -> "A et al.".
fn format_authors(authors: &[String]) -> String {
    match authors {
        [] => "Unknown".to_string(),
        [only] => only.clone(),
        [first, second] => format!("{first} & {second}"),
        [first, ..] => format!("{first} et al."),
    }
}

fn non_empty(field: Option<&str>) -> Option<&str> {
    field.map(str::trim).filter(|s| !s.is_empty())
}
