use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use sitechat_common::ChunkMetadata;
use tracing::debug;

/// Content-bearing elements walked in document order.
const CONTENT_SELECTOR: &str = "h1, h2, h3, h4, h5, h6, p, li, td, th, pre, blockquote";

/// Elements whose subtrees never contain retrievable content.
const STRIPPED_TAGS: &[&str] = &[
    "script", "style", "nav", "footer", "header", "aside", "form", "noscript", "iframe", "svg",
    "button", "select", "textarea", "label",
];

/// Class/id tokens that mark boilerplate containers surviving tag stripping.
const STRIPPED_TOKENS: &[&str] = &[
    "sidebar",
    "comments",
    "breadcrumb",
    "pagination",
    "ad",
    "advertisement",
];

/// Non-heading content tags whose text already covers nested matches.
const CONTAINER_TAGS: &[&str] = &["li", "td", "th", "pre", "blockquote"];

#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Soft word budget: the buffer flushes at the next element boundary.
    pub target_chunk_words: usize,
    /// Hard word ceiling no emitted chunk may exceed.
    pub max_chunk_words: usize,
    /// Minimum character length for a chunk to be kept.
    pub min_chunk_chars: usize,
    /// Minimum count of alphabetic tokens of >= 4 letters.
    pub min_significant_words: usize,
    /// Elements shorter than this are ignored as boilerplate fragments.
    pub min_element_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            target_chunk_words: 200,
            max_chunk_words: 300,
            min_chunk_chars: 50,
            min_significant_words: 4,
            min_element_chars: 15,
        }
    }
}

/// A chunk fresh out of the chunker, before embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChunk {
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Splits raw HTML into bounded, hierarchy-tagged text chunks.
///
/// Chunking is best-effort: malformed markup yields fewer (or zero) chunks,
/// never an error.
pub struct Chunker {
    config: ChunkerConfig,
    content_selector: Selector,
    significant_word: Regex,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        let content_selector =
            Selector::parse(CONTENT_SELECTOR).expect("content selector is valid");
        let significant_word =
            Regex::new(r"\p{Alphabetic}{4,}").expect("significant-word pattern is valid");
        Self {
            config,
            content_selector,
            significant_word,
        }
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Walks the document and produces validated chunks in reading order.
    pub fn chunk(&self, html: &str, source_url: &str) -> Vec<RawChunk> {
        let document = Html::parse_document(html);

        let mut chunks = Vec::new();
        let mut discarded = 0usize;
        let mut heading_stack: Vec<String> = Vec::new();
        let mut buffer = ChunkBuffer::default();

        for element in document.select(&self.content_selector) {
            if in_stripped_region(&element) {
                continue;
            }

            let tag = element.value().name();
            if let Some(level) = heading_level(tag) {
                let text = normalized_text(&element);
                if text.is_empty() {
                    continue;
                }
                self.flush(&mut buffer, source_url, &mut chunks, &mut discarded);
                heading_stack.truncate(level - 1);
                heading_stack.push(text);
                continue;
            }

            if has_container_ancestor(&element) {
                continue;
            }

            let text = normalized_text(&element);
            if text.chars().count() < self.config.min_element_chars {
                continue;
            }
            let words = text.split_whitespace().count();

            if words > self.config.max_chunk_words {
                // A single element above the ceiling is sliced directly so the
                // hard bound holds for any input.
                self.flush(&mut buffer, source_url, &mut chunks, &mut discarded);
                self.emit_sliced(
                    &text,
                    &heading_stack,
                    source_url,
                    &mut chunks,
                    &mut discarded,
                );
                continue;
            }

            if buffer.words > 0 && buffer.words + words > self.config.max_chunk_words {
                self.flush(&mut buffer, source_url, &mut chunks, &mut discarded);
            }
            buffer.push(text, words, &heading_stack);

            if buffer.words >= self.config.target_chunk_words {
                self.flush(&mut buffer, source_url, &mut chunks, &mut discarded);
            }
        }

        self.flush(&mut buffer, source_url, &mut chunks, &mut discarded);

        debug!(
            chunks = chunks.len(),
            discarded, source_url, "chunking completed"
        );
        chunks
    }

    fn flush(
        &self,
        buffer: &mut ChunkBuffer,
        source_url: &str,
        chunks: &mut Vec<RawChunk>,
        discarded: &mut usize,
    ) {
        if buffer.words == 0 {
            return;
        }
        let text = buffer.lines.join("\n");
        let hierarchy = std::mem::take(&mut buffer.hierarchy);
        buffer.lines.clear();
        buffer.words = 0;

        if self.validate(&text) {
            chunks.push(RawChunk {
                text,
                metadata: ChunkMetadata::new(source_url, hierarchy),
            });
        } else {
            *discarded += 1;
        }
    }

    fn emit_sliced(
        &self,
        text: &str,
        hierarchy: &[String],
        source_url: &str,
        chunks: &mut Vec<RawChunk>,
        discarded: &mut usize,
    ) {
        let words: Vec<&str> = text.split_whitespace().collect();
        for slice in words.chunks(self.config.target_chunk_words) {
            let piece = slice.join(" ");
            if self.validate(&piece) {
                chunks.push(RawChunk {
                    text: piece,
                    metadata: ChunkMetadata::new(source_url, hierarchy.to_vec()),
                });
            } else {
                *discarded += 1;
            }
        }
    }

    /// Minimum length plus a floor on significant words, filtering fragments
    /// like "Home | About | Contact" that survive structural stripping.
    fn validate(&self, text: &str) -> bool {
        if text.chars().count() < self.config.min_chunk_chars {
            return false;
        }
        self.significant_word.find_iter(text).count() >= self.config.min_significant_words
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(ChunkerConfig::default())
    }
}

#[derive(Default)]
struct ChunkBuffer {
    lines: Vec<String>,
    words: usize,
    hierarchy: Vec<String>,
}

impl ChunkBuffer {
    fn push(&mut self, text: String, words: usize, heading_stack: &[String]) {
        if self.words == 0 {
            self.hierarchy = heading_stack.to_vec();
        }
        self.lines.push(text);
        self.words += words;
    }
}

fn heading_level(tag: &str) -> Option<usize> {
    match tag {
        "h1" => Some(1),
        "h2" => Some(2),
        "h3" => Some(3),
        "h4" => Some(4),
        "h5" => Some(5),
        "h6" => Some(6),
        _ => None,
    }
}

fn normalized_text(element: &ElementRef) -> String {
    element
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_stripped(element: &ElementRef) -> bool {
    let value = element.value();
    if STRIPPED_TAGS.contains(&value.name()) {
        return true;
    }
    if value.attr("aria-hidden") == Some("true") {
        return true;
    }
    if matches!(value.attr("role"), Some("navigation") | Some("search")) {
        return true;
    }
    if value
        .classes()
        .any(|class| STRIPPED_TOKENS.contains(&class))
    {
        return true;
    }
    matches!(value.attr("id"), Some(id) if STRIPPED_TOKENS.contains(&id))
}

fn in_stripped_region(element: &ElementRef) -> bool {
    if is_stripped(element) {
        return true;
    }
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .any(|ancestor| is_stripped(&ancestor))
}

fn has_container_ancestor(element: &ElementRef) -> bool {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .any(|ancestor| CONTAINER_TAGS.contains(&ancestor.value().name()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paragraph(words: usize) -> String {
        // Distinct multi-letter words so validation always passes.
        (0..words)
            .map(|i| format!("paragraph{i}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_hierarchy_tracks_heading_levels() {
        let html = format!(
            "<html><body>\
             <h1>Products</h1><p>{}</p>\
             <h2>Pricing</h2><p>{}</p>\
             </body></html>",
            paragraph(30),
            paragraph(30)
        );
        let chunks = Chunker::default().chunk(&html, "https://example.com");

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].metadata.hierarchy, vec!["Products"]);
        assert_eq!(chunks[1].metadata.hierarchy, vec!["Products", "Pricing"]);
        assert!(chunks[0].text.contains("paragraph0"));
    }

    #[test]
    fn test_heading_at_same_level_replaces_sibling() {
        let html = format!(
            "<h1>Guide</h1>\
             <h2>Install</h2><p>{}</p>\
             <h2>Upgrade</h2><p>{}</p>",
            paragraph(25),
            paragraph(25)
        );
        let chunks = Chunker::default().chunk(&html, "https://example.com");

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].metadata.hierarchy, vec!["Guide", "Install"]);
        assert_eq!(chunks[1].metadata.hierarchy, vec!["Guide", "Upgrade"]);
    }

    #[test]
    fn test_strips_non_content_regions() {
        let html = format!(
            "<nav><p>{}</p></nav>\
             <header><p>{}</p></header>\
             <div aria-hidden=\"true\"><p>{}</p></div>\
             <div class=\"sidebar\"><p>{}</p></div>\
             <p>{}</p>\
             <footer><p>{}</p></footer>",
            paragraph(30),
            paragraph(30),
            paragraph(30),
            paragraph(30),
            paragraph(30),
            paragraph(30)
        );
        let chunks = Chunker::default().chunk(&html, "https://example.com");

        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_hard_word_ceiling_holds() {
        let config = ChunkerConfig::default();
        let max = config.max_chunk_words;
        let html = format!(
            "<h1>Long Section</h1><p>{}</p><p>{}</p><p>{}</p><p>{}</p>",
            paragraph(180),
            paragraph(180),
            paragraph(180),
            paragraph(500)
        );
        let chunks = Chunker::new(config).chunk(&html, "https://example.com");

        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert!(chunk.text.split_whitespace().count() <= max);
        }
    }

    #[test]
    fn test_discards_low_signal_fragments() {
        let html = "<p>Home | About | Contact | Blog | Terms and FAQ</p>";
        let chunks = Chunker::default().chunk(html, "https://example.com");
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_malformed_html_does_not_error() {
        let chunks = Chunker::default().chunk("<h1>Broken<p>unclosed", "https://example.com");
        // Best-effort: no panic, no error; short fragments fall below validation.
        assert!(chunks.is_empty());

        let empty = Chunker::default().chunk("", "https://example.com");
        assert!(empty.is_empty());
    }

    #[test]
    fn test_nested_list_text_not_duplicated() {
        let inner = paragraph(20);
        let html = format!("<ul><li>{inner} <p>{inner}</p></li></ul>");
        let chunks = Chunker::default().chunk(&html, "https://example.com");

        assert_eq!(chunks.len(), 1);
        let occurrences = chunks[0].text.matches("paragraph0 ").count();
        // The nested <p> is covered by its <li> ancestor and visited once.
        assert_eq!(occurrences, 2);
    }

    #[test]
    fn test_trailing_buffer_flushes() {
        let html = format!("<h1>Notes</h1><p>{}</p>", paragraph(40));
        let chunks = Chunker::default().chunk(&html, "https://example.com");

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].metadata.hierarchy, vec!["Notes"]);
        assert_eq!(chunks[0].metadata.source_url, "https://example.com");
    }

    #[test]
    fn test_single_section_stays_one_chunk() {
        // A 250-word section under one heading lands in a single chunk
        // within the hard ceiling.
        let html = format!(
            "<h1>Pricing</h1><p>{}</p><p>{}</p><p>{}</p>",
            paragraph(90),
            paragraph(80),
            paragraph(80)
        );
        let chunks = Chunker::default().chunk(&html, "https://example.com/pricing");

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].metadata.hierarchy, vec!["Pricing"]);
        assert!(chunks[0].text.split_whitespace().count() <= 300);
    }

    #[test]
    fn test_whitespace_is_normalized() {
        let html = format!("<p>  spaced \n\n   out   {} </p>", paragraph(20));
        let chunks = Chunker::default().chunk(&html, "https://example.com");

        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.starts_with("spaced out"));
        assert!(!chunks[0].text.contains("  "));
    }
}
