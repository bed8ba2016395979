/// Normalize a post reference to its numeric id.
///
/// Accepts any URL with a `status/<digits>` segment (x.com, twitter.com,
/// mobile links, trailing query or fragment) or a bare numeric id.
pub fn parse_post_id(reference: &str) -> Option<String> {
    let reference = reference.trim();
    if reference.is_empty() {
        return None;
    }
    if reference.bytes().all(|b| b.is_ascii_digit()) {
        return Some(reference.to_string());
    }
    reference.match_indices("status/").find_map(|(idx, pat)| {
        let digits: String = reference[idx + pat.len()..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        (!digits.is_empty()).then_some(digits)
    })
}
