/// Cells per table row; the address of a cell is `row * TABLE_COLUMNS + column`
pub const TABLE_COLUMNS: usize = 10;

/// Text grid the user edits, one cell per register address.
///
/// Rows are kept when the table grows or shrinks so values already typed survive
/// a change of register quantity, as long as their row still exists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegisterTable {
    rows: Vec<[Option<String>; TABLE_COLUMNS]>,
}

impl RegisterTable {
    pub fn new(register_quantity: usize) -> Self {
        let mut table = Self::default();
        table.resize(register_quantity);
        table
    }

    /// Number of rows needed to show `register_quantity` registers
    pub fn rows_for(register_quantity: usize) -> usize {
        register_quantity / TABLE_COLUMNS + 1
    }

    pub fn resize(&mut self, register_quantity: usize) {
        let rows = Self::rows_for(register_quantity);
        self.rows.resize_with(rows, Default::default);
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        TABLE_COLUMNS
    }

    pub fn address_of(row: usize, column: usize) -> usize {
        row * TABLE_COLUMNS + column
    }

    pub fn cell(&self, row: usize, column: usize) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .and_then(|c| c.as_deref())
    }

    /// Store the text of a cell. Returns false when the cell is outside the grid.
    pub fn set_cell(&mut self, row: usize, column: usize, text: impl Into<String>) -> bool {
        match self.rows.get_mut(row).and_then(|r| r.get_mut(column)) {
            Some(cell) => {
                *cell = Some(text.into());
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        for row in &mut self.rows {
            *row = Default::default();
        }
    }

    /// Every cell holding non-blank text, row-major, as `(row, column, text)`
    pub fn filled_cells(&self) -> impl Iterator<Item = (usize, usize, &str)> + '_ {
        self.rows.iter().enumerate().flat_map(|(row, cells)| {
            cells.iter().enumerate().filter_map(move |(column, cell)| {
                cell.as_deref()
                    .filter(|text| !text.trim().is_empty())
                    .map(|text| (row, column, text))
            })
        })
    }

    /// Row header labels: `+0`, `+10`, `+20`, ...
    pub fn row_labels(&self) -> Vec<String> {
        (0..self.rows.len())
            .map(|row| format!("+{}", row * TABLE_COLUMNS))
            .collect()
    }

    /// Column header labels: `+0` to `+9`
    pub fn column_labels(&self) -> Vec<String> {
        (0..TABLE_COLUMNS).map(|column| format!("+{}", column)).collect()
    }
}
