use crate::config::PageLayout;
use crate::models::{ExtractionMap, QuoteEntry};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, trace, warn};

// ── Selector helpers ──────────────────────────────────────────────────────────

fn quote_attr(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// `[id="..."]` rather than `#...`: ids built from symbols may contain
/// `.` or `-`, and the page repeats ids inside a row.
fn id_selector(id: &str) -> Option<Selector> {
    let css = format!("[id=\"{}\"]", quote_attr(id));
    match Selector::parse(&css) {
        Ok(s) => Some(s),
        Err(e) => {
            warn!("id selector {:?}: {:?}", id, e);
            None
        }
    }
}

fn class_selector(class: &str) -> Option<Selector> {
    let css = format!("[class~=\"{}\"]", quote_attr(class));
    match Selector::parse(&css) {
        Ok(s) => Some(s),
        Err(e) => {
            warn!("class selector {:?}: {:?}", class, e);
            None
        }
    }
}

fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() { None } else { Some(s) }
}

// ── Row scanner ───────────────────────────────────────────────────────────────

/// Walks the rows of the quote table: `r_0`, `r_1`, … until the first
/// index with no matching element.
///
/// A document without the table yields no rows.
pub struct RowScanner<'a> {
    table: Option<ElementRef<'a>>,
    layout: &'a PageLayout,
    index: usize,
}

impl<'a> RowScanner<'a> {
    pub fn new(doc: &'a Html, layout: &'a PageLayout) -> Self {
        let table = class_selector(&layout.table_class)
            .and_then(|sel| doc.select(&sel).next());

        if table.is_none() {
            warn!("Quote table (class {:?}) not found", layout.table_class);
        }

        Self { table, layout, index: 0 }
    }

    /// Start again from `r_0`.
    pub fn restart(&mut self) {
        self.index = 0;
    }

    pub fn has_table(&self) -> bool {
        self.table.is_some()
    }
}

impl<'a> Iterator for RowScanner<'a> {
    type Item = ElementRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let table = self.table?;
        let sel = id_selector(&self.layout.row_id(self.index))?;
        let row = table.select(&sel).next()?;
        self.index += 1;
        Some(row)
    }
}

pub fn rows<'a>(doc: &'a Html, layout: &'a PageLayout) -> RowScanner<'a> {
    RowScanner::new(doc, layout)
}

// ── Row fields ────────────────────────────────────────────────────────────────

/// Selectors that do not depend on the symbol, compiled once per document.
pub struct RowMarkers {
    symbol_block: Selector,
    name_block: Selector,
    anchor: Selector,
    change_cells: Vec<Selector>,
}

impl RowMarkers {
    pub fn compile(layout: &PageLayout) -> Option<Self> {
        Some(Self {
            symbol_block: id_selector(&layout.symbol_block_id)?,
            name_block: id_selector(&layout.name_block_id)?,
            anchor: Selector::parse("a").ok()?,
            change_cells: layout
                .change_cell_ids
                .iter()
                .filter_map(|id| id_selector(id))
                .collect(),
        })
    }
}

/// Change text for `symbol` inside one symbol block.
///
/// Cells are probed in layout order and a later hit replaces an earlier one,
/// so with `c1` and `c3` both present the `c3` text is returned.
fn find_change(
    block: ElementRef<'_>,
    symbol: &str,
    layout: &PageLayout,
    markers: &RowMarkers,
) -> Option<String> {
    let container_sel = id_selector(&layout.change_container_for(symbol))?;
    let container = block.select(&container_sel).next()?;

    let mut change = None;
    for cell_sel in &markers.change_cells {
        if let Some(text) = container.select(cell_sel).next().map(text_of).and_then(non_empty) {
            change = Some(text);
        }
    }
    change
}

/// Pull every new symbol out of one row into `quotes`.
///
/// Symbol blocks are walked in document order. A block with a link names a
/// symbol; a block without one continues the previous symbol of this row.
/// Symbols already in `quotes` are left untouched, as are blocks following
/// them. The row's first name block is the display name of every symbol it
/// registers; without it nothing is registered.
///
/// Returns the number of symbols registered.
pub fn extract_row(
    row: ElementRef<'_>,
    layout: &PageLayout,
    markers: &RowMarkers,
    quotes: &mut ExtractionMap,
) -> usize {
    let name = row.select(&markers.name_block).next().map(text_of).and_then(non_empty);

    let mut registered = 0;
    let mut current: Option<String> = None;

    for block in row.select(&markers.symbol_block) {
        let anchor_text = block.select(&markers.anchor).next().map(text_of).and_then(non_empty);

        if let Some(symbol) = anchor_text {
            current = None;

            if quotes.contains_key(&symbol) {
                trace!("{}: already registered, skipping", symbol);
                continue;
            }

            let Some(name) = name.as_ref() else {
                debug!("{}: row has no name block, skipping", symbol);
                continue;
            };

            quotes.insert(symbol.clone(), QuoteEntry::new(name.clone()));
            registered += 1;
            current = Some(symbol);
        }

        let Some(symbol) = current.as_deref() else {
            continue;
        };

        if let Some(change) = find_change(block, symbol, layout, markers) {
            if let Some(entry) = quotes.get_mut(symbol) {
                entry.change = Some(change);
            }
        }
    }

    registered
}

// ── Document ──────────────────────────────────────────────────────────────────

/// Parse one listing page and fold its rows into `quotes`.
///
/// Missing structure is never an error: the page just contributes nothing.
pub fn extract_document(html: &str, layout: &PageLayout, mut quotes: ExtractionMap) -> ExtractionMap {
    let doc = Html::parse_document(html);

    let Some(markers) = RowMarkers::compile(layout) else {
        return quotes;
    };

    let scanner = rows(&doc, layout);
    if !scanner.has_table() {
        return quotes;
    }

    let mut row_count = 0usize;
    let mut registered = 0usize;

    for row in scanner {
        registered += extract_row(row, layout, &markers, &mut quotes);
        row_count += 1;
    }

    debug!("{} rows scanned, {} symbols registered", row_count, registered);
    quotes
}

// ── Tests ─────────────────────────────────────────────────────────────────────
