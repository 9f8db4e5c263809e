//! "Magic mode": a bare `polyester sh` (or `P sh`) line with no inline
//! script argument absorbs every following line, up to the next
//! `polyester`/`P` call, as its script body — so a manifest author can
//! write a shell block under a `polyester sh` marker instead of passing it
//! as a quoted string. Operates on raw lines rather than a full shell
//! grammar: this port only needs to recognise call boundaries, not
//! evaluate shell semantics.

/// Rewrites `script`, replacing bare `polyester sh`/`P sh` markers with a
/// single double-quoted argument absorbing the lines that follow, up to
/// (but not including) the next `polyester`/`P` call.
pub fn rewrite_magic_mode(script: &str) -> String {
    let mut out = String::with_capacity(script.len() + 16);
    let mut magic_mode = false;

    for line in script.split_inclusive('\n') {
        let trimmed_end = line.trim_end_matches(['\n', '\r']);
        let is_call = is_polyester_call(trimmed_end);

        if magic_mode && is_call {
            out.push_str("\"; ");
            magic_mode = false;
        }

        if !magic_mode && is_sh_call_with_no_args(trimmed_end) {
            out.push_str(trimmed_end.trim_end());
            out.push_str(" \"");
            if line.ends_with('\n') {
                out.push('\n');
            }
            magic_mode = true;
            continue;
        }

        out.push_str(line);
    }

    if magic_mode {
        out.push_str("\"\n");
    }

    out
}

fn leading_tokens(line: &str) -> Vec<&str> {
    line.split_whitespace().collect()
}

fn is_polyester_call(line: &str) -> bool {
    matches!(leading_tokens(line).first(), Some(&"polyester") | Some(&"P"))
}

fn is_sh_call_with_no_args(line: &str) -> bool {
    let tokens = leading_tokens(line);
    matches!(tokens.first(), Some(&"polyester") | Some(&"P")) && tokens.get(1) == Some(&"sh") && tokens.len() == 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_magic_script_is_unchanged() {
        let script = "polyester touch --path /a\npolyester mkdir --path /b\n";
        assert_eq!(rewrite_magic_mode(script), script);
    }

    #[test]
    fn bare_sh_absorbs_following_lines_until_next_call() {
        let script = "polyester sh\necho one\necho two\npolyester touch --path /a\n";
        let rewritten = rewrite_magic_mode(script);
        assert!(rewritten.starts_with("polyester sh \"\necho one\necho two\n\"; polyester touch --path /a\n"));
    }

    #[test]
    fn trailing_magic_block_closes_at_end_of_script() {
        let script = "polyester sh\necho only\n";
        let rewritten = rewrite_magic_mode(script);
        assert_eq!(rewritten, "polyester sh \"\necho only\n\"\n");
    }

    #[test]
    fn sh_with_inline_args_is_not_magic() {
        let script = "polyester sh --script 'echo hi'\n";
        assert_eq!(rewrite_magic_mode(script), script);
    }
}
