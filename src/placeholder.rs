//! Extracción y sustitución de marcadores `{{Campo}}` en el texto generado.
//!
//! Sólo cuenta como marcador un par `{{` … `}}` cuyo interior no esté vacío y no
//! contenga llaves ni saltos de línea. Cualquier otra aparición de `{{` o `}}`
//! se trata como texto normal.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{([^{}\r\n]+)\}\}").expect("regex de marcadores válida")
    })
}

/// Nombres de campo distintos, en orden de primera aparición.
pub fn extract_fields(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut fields = Vec::new();
    for cap in placeholder_regex().captures_iter(text) {
        let name = &cap[1];
        if name.trim().is_empty() {
            continue;
        }
        if seen.insert(name.to_string()) {
            fields.push(name.to_string());
        }
    }
    fields
}

/// Marcador literal de un campo: `{{nombre}}`.
pub fn token_for(field: &str) -> String {
    format!("{{{{{field}}}}}")
}

/// Sustituye todas las apariciones del marcador de `field`.
/// Devuelve el texto nuevo y cuántas sustituciones hubo.
pub fn substitute(content: &str, field: &str, value: &str) -> (String, usize) {
    let token = token_for(field);
    let count = content.matches(token.as_str()).count();
    if count == 0 {
        return (content.to_string(), 0);
    }
    (content.replace(token.as_str(), value), count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_in_first_occurrence_order_without_duplicates() {
        let text = "{{Season}} {{Brand}} x {{Season}} {{Style Name}} {{Brand}}";
        assert_eq!(extract_fields(text), vec!["Season", "Brand", "Style Name"]);
    }

    #[test]
    fn sections_example_yields_brand_then_season() {
        let text = "## Brand\n{{Brand}}\n\n## Season\n{{Season}}";
        assert_eq!(extract_fields(text), vec!["Brand", "Season"]);
    }

    #[test]
    fn stray_braces_are_plain_text() {
        let text = "usa {{ y }} sueltos: {{}} {{\n}} {{   }} y {{{Brand}}}";
        // `{{ y }}` es válido (interior no vacío); `{{{Brand}}}` contiene `{{Brand}}`.
        assert_eq!(extract_fields(text), vec![" y ", "Brand"]);
        assert!(extract_fields("sin marcadores {{").is_empty());
    }

    #[test]
    fn names_are_case_sensitive() {
        assert_eq!(extract_fields("{{brand}} {{Brand}}"), vec!["brand", "Brand"]);
    }

    #[test]
    fn substitute_replaces_every_occurrence() {
        let (out, n) = substitute("{{Brand}} / {{Brand}} / {{Season}}", "Brand", "Nike");
        assert_eq!(out, "Nike / Nike / {{Season}}");
        assert_eq!(n, 2);
    }

    #[test]
    fn substitute_without_match_is_noop() {
        let (out, n) = substitute("sin nada", "Brand", "Nike");
        assert_eq!(out, "sin nada");
        assert_eq!(n, 0);
    }
}
