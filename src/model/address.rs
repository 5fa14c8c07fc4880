//! Mailbox parsing for address headers (`From`, `To`, `Cc`).

/// One mailbox from an address header: `Name <local@domain>` or a bare
/// `local@domain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    /// May be empty.
    pub display_name: String,
    /// Bare `local@domain`, as written.
    pub address: String,
}

impl Mailbox {
    /// Parse one mailbox.
    ///
    /// Accepts a bare address, `<addr>`, `Name <addr>` and `"Quoted, Name" <addr>`.
    /// Returns `None` when nothing address-like remains: empty input, empty
    /// brackets, or a group label such as `undisclosed-recipients:;`.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();

        if let Some((name, rest)) = raw.rsplit_once('<') {
            if let Some((inner, _)) = rest.split_once('>') {
                let address = inner.trim();
                return (!address.is_empty()).then(|| Self {
                    display_name: unquote(name),
                    address: address.to_string(),
                });
            }
        }

        let address = raw.trim_end_matches(';');
        address.contains('@').then(|| Self {
            display_name: String::new(),
            address: address.to_string(),
        })
    }

    /// Parse every mailbox of an address list, in header order.
    ///
    /// Commas inside quotes or angle brackets do not split.
    pub fn parse_list(raw: &str) -> Vec<Self> {
        split_top_level(raw).filter_map(Self::parse).collect()
    }
}

/// Split `raw` at commas that sit outside quotes and angle brackets.
fn split_top_level(raw: &str) -> impl Iterator<Item = &str> {
    let mut quoted = false;
    let mut bracketed = false;
    let mut start = 0;
    let mut cuts = Vec::new();

    for (i, ch) in raw.char_indices() {
        match ch {
            '"' => quoted = !quoted,
            '<' if !quoted => bracketed = true,
            '>' if !quoted => bracketed = false,
            ',' if !quoted && !bracketed => {
                cuts.push(&raw[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    cuts.push(&raw[start..]);
    cuts.into_iter()
}

/// Trim a display name and drop one pair of surrounding double quotes.
fn unquote(name: &str) -> String {
    let name = name.trim();
    name.strip_prefix('"')
        .and_then(|n| n.strip_suffix('"'))
        .unwrap_or(name)
        .trim()
        .to_string()
}
