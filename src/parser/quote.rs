//! Quoted-reply and signature stripping for plain-text bodies.

/// Closing phrases that start a signature block (compared case-insensitively,
/// with an optional trailing comma or exclamation mark).
const SIGN_OFFS: [&str; 9] = [
    "best regards",
    "kind regards",
    "warm regards",
    "regards",
    "thanks",
    "thank you",
    "cheers",
    "best",
    "sincerely",
];

/// Remove quoted lines, reply attributions and the trailing signature.
///
/// - Lines starting with `>` or `|` are dropped.
/// - An attribution line (`On … wrote:`) ends the body: everything from it
///   on belongs to the quoted message.
/// - The first signature delimiter (`--`, `-- `, `---`, `___`, `Sent from …`
///   or a sign-off such as `Best regards`) ends the body, that line included.
///
/// Trailing whitespace of the result is trimmed.
pub fn strip_quotes_and_signature(text: &str) -> String {
    let mut kept: Vec<&str> = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('>') || trimmed.starts_with('|') {
            continue;
        }
        if is_attribution(trimmed) || is_signature_delimiter(trimmed) {
            break;
        }
        kept.push(line);
    }

    kept.join("\n").trim_end().to_string()
}

/// `On <anything> wrote:`
fn is_attribution(line: &str) -> bool {
    line.starts_with("On ") && line.ends_with("wrote:")
}

fn is_signature_delimiter(line: &str) -> bool {
    if matches!(line, "--" | "---" | "___") {
        return true;
    }
    if line.starts_with("Sent from ") {
        return true;
    }
    let bare = line.trim_end_matches([',', '!', '.']).to_lowercase();
    SIGN_OFFS.contains(&bare.as_str())
}
