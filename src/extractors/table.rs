//! HTML table flattening
//!
//! Statement pages nest period labels above sub-columns through `colspan` and
//! `rowspan`. Expanding each table into a rectangular grid gives every column a
//! header path (one label per header row) that can be matched by name.

use scraper::{ElementRef, Html, Selector};

/// Upper bound on a single cell's span; the portal never comes close
const MAX_SPAN: usize = 256;

#[derive(Debug, Clone)]
struct RawCell {
    text: String,
    colspan: usize,
    rowspan: usize,
}

/// One `<table>` flattened into header and body grids
#[derive(Debug, Clone, Default)]
pub struct FlatTable {
    pub header: Vec<Vec<String>>,
    pub body: Vec<Vec<String>>,
}

impl FlatTable {
    /// Flatten every table in the document, outermost first.
    /// Rows belong to their nearest enclosing table only.
    pub fn collect_all(document: &Html) -> Vec<FlatTable> {
        let (Ok(table_selector), Ok(row_selector)) = (Selector::parse("table"), Selector::parse("tr")) else {
            return Vec::new();
        };

        document
            .select(&table_selector)
            .map(|table| {
                let mut header_rows = Vec::new();
                let mut body_rows = Vec::new();
                for row in table.select(&row_selector) {
                    if nearest_table(row).map(|t| t.id()) != Some(table.id()) {
                        continue;
                    }
                    let (is_header, cells) = read_row(row);
                    if is_header {
                        header_rows.push(cells);
                    } else {
                        body_rows.push(cells);
                    }
                }
                FlatTable {
                    header: expand(&header_rows),
                    body: expand(&body_rows),
                }
            })
            .collect()
    }

    /// Whether any header cell contains `label`, ignoring whitespace
    pub fn header_mentions(&self, label: &str) -> bool {
        let label = squash(label);
        self.header.iter().flatten().any(|cell| squash(cell).contains(&label))
    }

    /// First column whose header path mentions every one of `labels`
    pub fn find_column(&self, labels: &[&str]) -> Option<usize> {
        let width = self.header.iter().map(Vec::len).max().unwrap_or(0);
        let labels: Vec<String> = labels.iter().map(|l| squash(l)).collect();

        (0..width).find(|&col| {
            let path: Vec<String> = self
                .header
                .iter()
                .filter_map(|row| row.get(col))
                .map(|cell| squash(cell))
                .collect();
            labels.iter().all(|label| path.iter().any(|cell| cell.contains(label.as_str())))
        })
    }
}

fn squash(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

fn nearest_table(row: ElementRef<'_>) -> Option<ElementRef<'_>> {
    row.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "table")
}

fn span(cell: ElementRef<'_>, attr: &str) -> usize {
    cell.value()
        .attr(attr)
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(1)
        .clamp(1, MAX_SPAN)
}

/// Read a row's direct cells. A row is a header row when it carries `<th>`
/// cells or the portal's `tblHead` class.
fn read_row(row: ElementRef<'_>) -> (bool, Vec<RawCell>) {
    let mut has_th = false;
    let cells = row
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|el| matches!(el.value().name(), "td" | "th"))
        .map(|el| {
            has_th |= el.value().name() == "th";
            RawCell {
                text: el.text().collect::<String>().trim().to_string(),
                colspan: span(el, "colspan"),
                rowspan: span(el, "rowspan"),
            }
        })
        .collect();

    let head_class = row
        .value()
        .attr("class")
        .map_or(false, |class| class.contains("tblHead"));

    (has_th || head_class, cells)
}

/// Lay rows out on a grid, repeating spanned cells into every slot they cover
fn expand(rows: &[Vec<RawCell>]) -> Vec<Vec<String>> {
    // per column: text still owed to following rows and how many rows remain
    let mut carry: Vec<Option<(String, usize)>> = Vec::new();
    let mut grid = Vec::with_capacity(rows.len());

    for row in rows {
        let mut out: Vec<String> = Vec::new();
        let mut cells = row.iter();

        loop {
            let col = out.len();
            if let Some(slot) = carry.get_mut(col) {
                if let Some((text, remaining)) = slot.take() {
                    out.push(text.clone());
                    if remaining > 1 {
                        *slot = Some((text, remaining - 1));
                    }
                    continue;
                }
            }

            let Some(cell) = cells.next() else { break };
            for _ in 0..cell.colspan {
                let col = out.len();
                out.push(cell.text.clone());
                if cell.rowspan > 1 {
                    if carry.len() <= col {
                        carry.resize(col + 1, None);
                    }
                    carry[col] = Some((cell.text.clone(), cell.rowspan - 1));
                }
            }
        }

        // spans hanging past the end of a short row
        for col in out.len()..carry.len() {
            if let Some((text, remaining)) = carry[col].take() {
                out.resize(col, String::new());
                out.push(text.clone());
                if remaining > 1 {
                    carry[col] = Some((text, remaining - 1));
                }
            }
        }

        grid.push(out);
    }

    grid
}
