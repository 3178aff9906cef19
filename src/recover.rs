//! Recuperación de un registro estructurado (atributos clave + BOM) a partir de
//! la ficha técnica final, que es markdown libre.
//!
//! Tres pasadas en orden; una pasada posterior sólo pisa un valor anterior
//! cuando encuentra algo no vacío:
//!   1. Líneas `clave: valor`.
//!   2. Encabezado + bloque siguiente.
//!   3. Lista de materiales (BOM).
//! Los atributos que no aparecen conservan los valores por defecto del llamante.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::OnceLock;

use pulldown_cmark::{Event, Parser as MdParser, Tag, TagEnd};
use regex::Regex;
use serde::Serialize;

/// Máximo de filas de la BOM (etiquetas A–K).
pub const MAX_BOM_ROWS: usize = 11;
const BOM_COLUMNS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalKey {
    Brand,
    Designer,
    StyleName,
    StyleNumber,
    Season,
    Description,
    Fabric,
    SizeRange,
}

impl CanonicalKey {
    pub const ALL: [CanonicalKey; 8] = [
        Self::Brand,
        Self::Designer,
        Self::StyleName,
        Self::StyleNumber,
        Self::Season,
        Self::Description,
        Self::Fabric,
        Self::SizeRange,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Brand => "Brand",
            Self::Designer => "Designer",
            Self::StyleName => "Style Name",
            Self::StyleNumber => "Style Number",
            Self::Season => "Season",
            Self::Description => "Description",
            Self::Fabric => "Fabric",
            Self::SizeRange => "Size Range",
        }
    }

    /// Clave canónica de un texto (clave de línea o encabezado), por subcadena.
    pub fn match_text(text: &str) -> Option<Self> {
        let key = text.to_lowercase();
        if key.contains("brand") {
            Some(Self::Brand)
        } else if key.contains("designer") {
            Some(Self::Designer)
        } else if key.contains("style name") {
            Some(Self::StyleName)
        } else if key.contains("style number") {
            Some(Self::StyleNumber)
        } else if key.contains("description") {
            Some(Self::Description)
        } else if key.contains("season") {
            Some(Self::Season)
        } else if key.contains("fabric") && !key.contains("materials") {
            Some(Self::Fabric)
        } else if key.contains("size") {
            Some(Self::SizeRange)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BomRow {
    pub label: String,
    pub item: String,
    pub description: String,
    pub color: String,
    pub code: String,
    pub quantity: String,
    pub supplier: String,
}

impl BomRow {
    /// Reparte una línea en columnas: `;` si aparece, si no `,`.
    pub fn from_line(label: String, line: &str) -> Self {
        let delimiter = if line.contains(';') { ';' } else { ',' };
        let mut cols: Vec<String> = line
            .split(delimiter)
            .take(BOM_COLUMNS)
            .map(|c| c.trim().to_string())
            .collect();
        cols.resize(BOM_COLUMNS, String::new());
        let mut cols = cols.into_iter();
        let mut next = || cols.next().unwrap_or_default();
        Self {
            label,
            item: next(),
            description: next(),
            color: next(),
            code: next(),
            quantity: next(),
            supplier: next(),
        }
    }

    fn label_only(label: String) -> Self {
        Self {
            label,
            ..Self::default()
        }
    }
}

/// Valores que se usan cuando el documento no aporta un atributo.
#[derive(Debug, Clone)]
pub struct RecordDefaults {
    values: BTreeMap<CanonicalKey, String>,
}

impl Default for RecordDefaults {
    fn default() -> Self {
        let values = CanonicalKey::ALL
            .iter()
            .map(|k| {
                let v = match k {
                    CanonicalKey::Brand => "Brand Name",
                    CanonicalKey::Designer => "Designer Name",
                    CanonicalKey::StyleName => "Style Name",
                    CanonicalKey::StyleNumber => "Style #",
                    CanonicalKey::Season => "Season",
                    _ => "",
                };
                (*k, v.to_string())
            })
            .collect();
        Self { values }
    }
}

impl RecordDefaults {
    pub fn with(mut self, key: CanonicalKey, value: impl Into<String>) -> Self {
        self.values.insert(key, value.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractedRecord {
    pub attributes: BTreeMap<CanonicalKey, String>,
    pub bom: Vec<BomRow>,
}

impl ExtractedRecord {
    pub fn get(&self, key: CanonicalKey) -> &str {
        self.attributes.get(&key).map(String::as_str).unwrap_or("")
    }
}

/// Representación imprimible de maquetación fija.
impl fmt::Display for ExtractedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "TECH PACK")?;
        writeln!(f, "{}", "=".repeat(72))?;
        for key in CanonicalKey::ALL {
            writeln!(f, "{:<14}{}", format!("{}:", key.label()), self.get(key))?;
        }
        writeln!(f)?;
        writeln!(f, "BILL OF MATERIALS")?;
        writeln!(f, "{}", "-".repeat(72))?;
        writeln!(
            f,
            "{:<3}{:<18}{:<18}{:<10}{:<8}{:<6}{}",
            "", "Item", "Description", "Color", "Code", "Qty", "Supplier"
        )?;
        if self.bom.is_empty() {
            writeln!(f, "   (sin materiales)")?;
        }
        for row in &self.bom {
            writeln!(
                f,
                "{:<3}{:<18}{:<18}{:<10}{:<8}{:<6}{}",
                row.label,
                row.item,
                row.description,
                row.color,
                row.code,
                row.quantity,
                row.supplier
            )?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Bloques del documento
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Block {
    Heading(String),
    Paragraph(Vec<String>),
    List(Vec<String>),
}

impl Block {
    fn text(&self) -> String {
        match self {
            Block::Heading(t) => t.clone(),
            Block::Paragraph(lines) => lines.join("\n"),
            Block::List(items) => items.join(", "),
        }
    }

    /// Líneas "tipo párrafo": las de los párrafos y cada elemento de lista.
    fn lines(&self) -> &[String] {
        match self {
            Block::Heading(_) => &[],
            Block::Paragraph(lines) | Block::List(lines) => lines,
        }
    }
}

/// Aplana el markdown en una secuencia de bloques hermanos. Las listas
/// anidadas se aplanan dentro de la lista exterior.
fn parse_blocks(markdown: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut heading: Option<String> = None;
    let mut paragraph: Option<String> = None;
    let mut list_depth = 0usize;
    let mut list_items: Vec<String> = Vec::new();
    let mut item_stack: Vec<String> = Vec::new();

    for event in MdParser::new(markdown) {
        match event {
            Event::Start(Tag::Heading { .. }) => heading = Some(String::new()),
            Event::End(TagEnd::Heading(_)) => {
                if let Some(text) = heading.take() {
                    blocks.push(Block::Heading(text.trim().to_string()));
                }
            }
            Event::Start(Tag::Paragraph) if list_depth == 0 => paragraph = Some(String::new()),
            Event::End(TagEnd::Paragraph) if list_depth == 0 => {
                if let Some(text) = paragraph.take() {
                    let lines: Vec<String> = text
                        .lines()
                        .map(str::trim)
                        .filter(|l| !l.is_empty())
                        .map(str::to_string)
                        .collect();
                    if !lines.is_empty() {
                        blocks.push(Block::Paragraph(lines));
                    }
                }
            }
            Event::Start(Tag::List(_)) => list_depth += 1,
            Event::End(TagEnd::List(_)) => {
                list_depth = list_depth.saturating_sub(1);
                if list_depth == 0 && !list_items.is_empty() {
                    blocks.push(Block::List(std::mem::take(&mut list_items)));
                }
            }
            Event::Start(Tag::Item) => item_stack.push(String::new()),
            Event::End(TagEnd::Item) => {
                if let Some(item) = item_stack.pop() {
                    let item = item.trim().to_string();
                    if !item.is_empty() {
                        list_items.push(item);
                    }
                }
            }
            Event::Text(text) | Event::Code(text) => push_text(
                &mut heading,
                &mut paragraph,
                &mut item_stack,
                &text,
            ),
            Event::SoftBreak | Event::HardBreak => {
                let sep = if item_stack.is_empty() { "\n" } else { " " };
                push_text(&mut heading, &mut paragraph, &mut item_stack, sep);
            }
            _ => {}
        }
    }
    blocks
}

fn push_text(
    heading: &mut Option<String>,
    paragraph: &mut Option<String>,
    item_stack: &mut [String],
    text: &str,
) {
    if let Some(h) = heading.as_mut() {
        h.push_str(text);
    } else if let Some(item) = item_stack.last_mut() {
        item.push_str(text);
    } else if let Some(p) = paragraph.as_mut() {
        p.push_str(text);
    }
}

// ---------------------------------------------------------------------
// Pasadas
// ---------------------------------------------------------------------

fn key_value_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([^:]+):\s*(.+)$").expect("regex clave:valor válida"))
}

fn bom_placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{BOM Item (\d+)\}\}").expect("regex de BOM válida"))
}

/// Pasada 1: `clave: valor`; la última línea que coincide gana.
fn scan_key_values(blocks: &[Block], attrs: &mut BTreeMap<CanonicalKey, String>) {
    for line in blocks.iter().flat_map(Block::lines) {
        let Some(caps) = key_value_regex().captures(line) else {
            continue;
        };
        let value = caps[2].trim();
        if value.is_empty() {
            continue;
        }
        if let Some(key) = CanonicalKey::match_text(&caps[1]) {
            attrs.insert(key, value.to_string());
        }
    }
}

/// Pasada 2: el texto del bloque que sigue a un encabezado es su valor.
fn scan_headings(blocks: &[Block], attrs: &mut BTreeMap<CanonicalKey, String>) {
    for (i, block) in blocks.iter().enumerate() {
        let Block::Heading(title) = block else {
            continue;
        };
        let Some(key) = CanonicalKey::match_text(title) else {
            continue;
        };
        let candidate = match blocks.get(i + 1) {
            Some(next) if !matches!(next, Block::Heading(_)) => next.text(),
            _ => continue,
        };
        let candidate = candidate.trim();
        if !candidate.is_empty() {
            attrs.insert(key, candidate.to_string());
        }
    }
}

/// 2 para "bill of materials", 1 para "materials" o la palabra suelta "bom",
/// 0 si el encabezado no abre la lista de materiales.
fn bom_heading_rank(text: &str) -> u8 {
    let t = text.to_lowercase();
    if t.contains("bill of materials") {
        2
    } else if t.contains("materials")
        || t.split(|c: char| !c.is_alphanumeric()).any(|w| w == "bom")
    {
        1
    } else {
        0
    }
}

/// Líneas que sólo repiten la cabecera de la sección, la fila de títulos de
/// columna o una instrucción genérica.
fn is_noise_line(line: &str, heading: &str) -> bool {
    let l = line.trim().to_lowercase();
    if l.is_empty() || l == heading.trim().to_lowercase() || l.contains("bill of materials") {
        return true;
    }
    let first_col = l.split([';', ',']).next().unwrap_or("").trim();
    if first_col == "item" && l.contains("description") {
        return true;
    }
    const INSTRUCTIONS: [&str; 5] = ["please ", "list ", "include ", "provide ", "add "];
    INSTRUCTIONS.iter().any(|p| l.starts_with(p))
}

fn row_label(index: usize) -> String {
    char::from(b'A' + index as u8).to_string()
}

fn rows_from_lines<'a>(lines: impl Iterator<Item = &'a String>, heading: &str) -> Vec<BomRow> {
    lines
        .filter(|l| !is_noise_line(l, heading))
        .take(MAX_BOM_ROWS)
        .enumerate()
        .map(|(i, l)| BomRow::from_line(row_label(i), l))
        .collect()
}

/// Pasada 3: lista de materiales.
fn recover_bom(blocks: &[Block], markdown: &str) -> Vec<BomRow> {
    // El encabezado más específico gana; a igualdad, el primero.
    let bom_heading = blocks
        .iter()
        .enumerate()
        .filter_map(|(i, b)| match b {
            Block::Heading(t) => match bom_heading_rank(t) {
                0 => None,
                rank => Some((rank, i, t.as_str())),
            },
            _ => None,
        })
        .min_by_key(|&(rank, i, _)| (Reverse(rank), i))
        .map(|(_, i, t)| (i, t));

    let mut rows = match bom_heading {
        Some((start, heading)) => {
            let section = blocks[start + 1..]
                .iter()
                .take_while(|b| !matches!(b, Block::Heading(_)));
            rows_from_lines(section.flat_map(Block::lines), heading)
        }
        None => fallback_lists(blocks),
    };

    if rows.is_empty() {
        rows = placeholder_rows(markdown);
    }
    rows
}

/// Sin encabezado de BOM: primera lista precedida por texto que hable de
/// materiales, tejidos o BOM.
fn fallback_lists(blocks: &[Block]) -> Vec<BomRow> {
    for pair in blocks.windows(2) {
        let (before, Block::List(items)) = (&pair[0], &pair[1]) else {
            continue;
        };
        let context = before.text().to_lowercase();
        if !(context.contains("material") || context.contains("fabric") || context.contains("bom")) {
            continue;
        }
        let rows = rows_from_lines(items.iter(), "");
        if !rows.is_empty() {
            return rows;
        }
    }
    Vec::new()
}

/// Último recurso: marcadores `{{BOM Item n}}` sin resolver dan filas vacías.
fn placeholder_rows(markdown: &str) -> Vec<BomRow> {
    let mut seen = HashSet::new();
    bom_placeholder_regex()
        .captures_iter(markdown)
        .filter(|c| seen.insert(c[1].to_string()))
        .take(MAX_BOM_ROWS)
        .enumerate()
        .map(|(i, _)| BomRow::label_only(row_label(i)))
        .collect()
}

/// Reconstruye el registro de exportación. Nunca falla.
pub fn recover_record(markdown: &str, defaults: &RecordDefaults) -> ExtractedRecord {
    let blocks = parse_blocks(markdown);

    let mut attributes = defaults.values.clone();
    scan_key_values(&blocks, &mut attributes);
    scan_headings(&blocks, &mut attributes);
    let bom = recover_bom(&blocks, markdown);

    ExtractedRecord { attributes, bom }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(md: &str) -> ExtractedRecord {
        recover_record(md, &RecordDefaults::default())
    }

    #[test]
    fn bom_line_prefers_semicolon() {
        let row = BomRow::from_line("A".into(), "Cotton, 100%;Blue");
        assert_eq!(row.item, "Cotton, 100%");
        assert_eq!(row.description, "Blue");
        assert_eq!(row.color, "");
        assert_eq!(row.code, "");
        assert_eq!(row.quantity, "");
        assert_eq!(row.supplier, "");
    }

    #[test]
    fn bom_line_uses_comma_and_drops_extra_columns() {
        let row = BomRow::from_line("B".into(), "Zip, YKK metal, Black, Z-01, 1, YKK, extra");
        assert_eq!(row.item, "Zip");
        assert_eq!(row.supplier, "YKK");
    }

    #[test]
    fn key_value_lines_last_write_wins() {
        let md = "Brand: Acme\n\nSome text\n\n**Brand:** Nike\n\nStyle Number: SN-123\n\nFabric & Materials: ignored";
        let rec = record(md);
        assert_eq!(rec.get(CanonicalKey::Brand), "Nike");
        assert_eq!(rec.get(CanonicalKey::StyleNumber), "SN-123");
        assert_eq!(rec.get(CanonicalKey::Fabric), "");
    }

    #[test]
    fn headings_override_key_values_only_when_non_empty() {
        let md = "Designer: Ana\n\nSeason: SS25\n\n## Season\nFW24\n\n## Designer\n\n## Brand\n";
        let rec = record(md);
        assert_eq!(rec.get(CanonicalKey::Season), "FW24");
        assert_eq!(rec.get(CanonicalKey::Designer), "Ana");
        assert_eq!(rec.get(CanonicalKey::Brand), "Brand Name");
    }

    #[test]
    fn heading_followed_by_list_joins_items() {
        let md = "## Size Range\n- S\n- M\n- L\n";
        assert_eq!(record(md).get(CanonicalKey::SizeRange), "S, M, L");
    }

    #[test]
    fn unmatched_attributes_keep_caller_defaults() {
        let defaults = RecordDefaults::default().with(CanonicalKey::Brand, "Marca pendiente");
        let rec = recover_record("# Ficha\n\nNada útil aquí.", &defaults);
        assert_eq!(rec.get(CanonicalKey::Brand), "Marca pendiente");
        assert_eq!(rec.get(CanonicalKey::Designer), "Designer Name");
        assert!(rec.bom.is_empty());
    }

    #[test]
    fn bom_section_collects_until_next_heading() {
        let md = "\
## Bill of Materials
Item; Description; Color; Code; Quantity; Supplier
- Shell fabric; Nylon twill; Olive; F-01; 2.1m; Tessuti
- Rib; Cotton rib; Black; R-02; 0.3m; Ribco

Please confirm suppliers before sampling.

## Construction
- Flat seams; not a bom row
";
        let rec = record(md);
        assert_eq!(rec.bom.len(), 2);
        assert_eq!(rec.bom[0].label, "A");
        assert_eq!(rec.bom[0].item, "Shell fabric");
        assert_eq!(rec.bom[1].label, "B");
        assert_eq!(rec.bom[1].supplier, "Ribco");
    }

    #[test]
    fn title_containing_bom_does_not_hijack_the_section() {
        let md = "\
# Bomber Jacket

Lightweight bomber for spring drops.

## Materials
Nylon shell with cotton rib trims.

## Bill of Materials
- Shell fabric; Nylon twill; Olive
";
        let rec = record(md);
        assert_eq!(rec.bom.len(), 1);
        assert_eq!(rec.bom[0].item, "Shell fabric");

        assert_eq!(bom_heading_rank("Bomber Jacket"), 0);
        assert_eq!(bom_heading_rank("BOM"), 1);
        assert_eq!(bom_heading_rank("Trims & BOM"), 1);
    }

    #[test]
    fn bom_is_capped_at_eleven_rows() {
        let mut md = String::from("## BOM\n");
        for i in 0..15 {
            md.push_str(&format!("- Item {i}; desc\n"));
        }
        let rec = record(&md);
        assert_eq!(rec.bom.len(), MAX_BOM_ROWS);
        assert_eq!(rec.bom.last().unwrap().label, "K");
    }

    #[test]
    fn falls_back_to_list_after_material_text() {
        let md = "## Overview\nA jacket.\n\nThe main fabric components are:\n\n- Wool, Outer shell, Grey\n- Lining, Inner, Red\n";
        let rec = record(md);
        assert_eq!(rec.bom.len(), 2);
        assert_eq!(rec.bom[0].item, "Wool");
        assert_eq!(rec.bom[1].color, "Red");
    }

    #[test]
    fn unresolved_bom_placeholders_yield_label_rows() {
        let md = "## Notes\n{{BOM Item 1}} and {{BOM Item 2}} and again {{BOM Item 1}}";
        let rec = record(md);
        assert_eq!(rec.bom.len(), 2);
        assert_eq!(rec.bom[1], BomRow::label_only("B".to_string()));
    }

    #[test]
    fn printable_layout_lists_attributes_and_rows() {
        let rec = record("Brand: Nike\n\n## BOM\n- Zip; Metal\n");
        let text = rec.to_string();
        assert!(text.starts_with("TECH PACK\n"));
        assert!(text.contains("Brand:        Nike"));
        assert!(text.contains("A  Zip"));
    }
}
