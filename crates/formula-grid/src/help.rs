use crate::functions::BUILTINS;

const OPERATORS: &[(&str, &str)] = &[
    ("+", "Addition"),
    ("-", "Subtraction"),
    ("*", "Multiplication"),
    ("/", "Division"),
    ("x ^ y", "Returns x raised to the power of y"),
    ("x > y", "Returns true (1), if x is greater than y, else false (0)"),
    ("x < y", "Returns true (1), if x is less than y, else false (0)"),
    ("x = y", "Returns true (1), if x equals y, else false (0)"),
    ("x & y", "Returns true (1), if both x and y are true (i.e. not 0)"),
    ("x | y", "Returns true (1), if at least one of both x and y is true (i.e. not 0)"),
];

/// Documentation for every operator and built-in function, followed by `additional` entries
/// (e.g. caller-side tokens like `xpos()`).
///
/// Plain text has one `usage - description` line per entry; HTML is a two-column table.
pub fn help_operators(html: bool, additional: &[(&str, &str)]) -> String {
    let entries = OPERATORS
        .iter()
        .copied()
        .chain(BUILTINS.iter().map(|spec| (spec.usage, spec.description)))
        .chain(additional.iter().copied());

    let mut out = String::new();
    if html {
        out.push_str("<table border=\"0\">");
        for (usage, description) in entries {
            out.push_str("<tr><td><b>");
            out.push_str(&escape_html(usage));
            out.push_str("</b></td><td>");
            out.push_str(&escape_html(description));
            out.push_str("</td></tr>");
        }
        out.push_str("</table>");
    } else {
        for (usage, description) in entries {
            out.push_str(usage);
            out.push_str(" - ");
            out.push_str(description);
            out.push('\n');
        }
    }
    out
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_lists_operators_and_builtins() {
        let text = help_operators(false, &[]);
        assert_eq!(text.lines().count(), OPERATORS.len() + BUILTINS.len());
        assert!(text.starts_with("+ - Addition\n"));
        assert!(text.contains("\natan2(x, y) - Arctangent of x/y\n"));
        assert!(text.contains("\nx < y - Returns true (1), if x is less than y, else false (0)\n"));
    }

    #[test]
    fn html_escapes_markup() {
        let html = help_operators(true, &[("nodata()", "No-data value of the result")]);
        assert!(html.starts_with("<table border=\"0\"><tr><td><b>+</b></td>"));
        assert!(html.ends_with(
            "<tr><td><b>nodata()</b></td><td>No-data value of the result</td></tr></table>"
        ));
        assert!(html.contains("<b>x &lt; y</b>"));
        assert!(html.contains("<b>x &amp; y</b>"));
        assert!(!html.contains("<b>x < y</b>"));
    }

    #[test]
    fn additional_entries_come_last() {
        let text = help_operators(false, &[("g1", "First input layer")]);
        assert!(text.ends_with("max(x, y) - Returns the maximum of values x and y\ng1 - First input layer\n"));
    }
}
