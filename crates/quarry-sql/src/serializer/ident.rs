use super::{Flavor, Formatter, Params, ToSql};

/// A table, column, or alias name. Quoted only when it would not parse bare.
pub(super) struct Ident<S>(pub(super) S);

const RESERVED: &[&str] = &[
    "all", "and", "as", "asc", "between", "by", "case", "check", "column", "cross", "default",
    "delete", "desc", "distinct", "else", "end", "except", "exists", "from", "full", "group",
    "having", "in", "index", "inner", "insert", "intersect", "into", "is", "join", "key", "left",
    "like", "limit", "not", "null", "offset", "on", "or", "order", "outer", "primary",
    "references", "right", "select", "set", "table", "then", "to", "union", "update", "user",
    "values", "when", "where", "with",
];

impl<S: AsRef<str>> ToSql for Ident<S> {
    fn to_sql<T: Params>(self, f: &mut Formatter<'_, T>) {
        let name = self.0.as_ref();

        if !needs_quotes(name) {
            f.dst.push_str(name);
            return;
        }

        let (open, close) = match f.flavor() {
            Flavor::Mysql => ('`', '`'),
            Flavor::SqlServer => ('[', ']'),
            Flavor::Sqlite | Flavor::Postgresql => ('"', '"'),
        };

        f.dst.push(open);
        for c in name.chars() {
            if c == close {
                f.dst.push(close);
            }
            f.dst.push(c);
        }
        f.dst.push(close);
    }
}

fn needs_quotes(name: &str) -> bool {
    let mut chars = name.chars();
    let plain = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    !plain || RESERVED.contains(&name.to_ascii_lowercase().as_str())
}

#[cfg(test)]
mod tests {
    use super::needs_quotes;

    #[test]
    fn quoting() {
        assert!(!needs_quotes("p1_0"));
        assert!(!needs_quotes("first_name"));
        assert!(needs_quotes("order"));
        assert!(needs_quotes("User"));
        assert!(needs_quotes("1st"));
        assert!(needs_quotes("has space"));
        assert!(needs_quotes(""));
    }
}
