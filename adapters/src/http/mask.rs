const SECRET_PARAMS: [&str; 2] = ["key=", "token="];
const MASK: &str = "********";

/// Replaces the values of `key=` and `token=` query parameters with a mask.
///
/// Applied to every URL or error string that may end up in logs or reports.
pub fn mask_secrets(input: &str) -> String {
    let lower = input.to_ascii_lowercase();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;

    while i < input.len() {
        let hit = SECRET_PARAMS.iter().find(|p| {
            lower[i..].starts_with(*p) && (i == 0 || matches!(input.as_bytes()[i - 1], b'?' | b'&'))
        });

        match hit {
            Some(param) => {
                let value_start = i + param.len();
                let value_end = input[value_start..]
                    .find(|c: char| matches!(c, '&' | '#' | ')' | '"') || c.is_whitespace())
                    .map(|off| value_start + off)
                    .unwrap_or(input.len());

                out.push_str(&input[i..value_start]);
                if value_end > value_start {
                    out.push_str(MASK);
                }
                i = value_end;
            }
            None => {
                let ch = input[i..].chars().next().unwrap_or_default();
                out.push(ch);
                i += ch.len_utf8().max(1);
            }
        }
    }

    out
}
