use serde::Serialize;

/// Recorded range and long-run mean of a market index.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexCoverage {
    pub start_year: i32,
    pub end_year: i32,
    pub average_return: f64,
}

impl IndexCoverage {
    pub fn contains(&self, year: i32) -> bool {
        (self.start_year..=self.end_year).contains(&year)
    }
}

/// Read-only source of historical annual index returns.
pub trait HistoricalIndexData {
    fn annual_return(&self, index: &str, year: i32) -> Option<f64>;
    fn coverage(&self, index: &str) -> Option<IndexCoverage>;
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSummary {
    pub id: &'static str,
    pub name: &'static str,
    #[serde(flatten)]
    pub coverage: IndexCoverage,
}

struct IndexTable {
    id: &'static str,
    name: &'static str,
    first_year: i32,
    returns: &'static [f64],
}

impl IndexTable {
    fn rate(&self, year: i32) -> Option<f64> {
        let offset = year.checked_sub(self.first_year)?;
        usize::try_from(offset)
            .ok()
            .and_then(|i| self.returns.get(i).copied())
    }

    fn coverage(&self) -> IndexCoverage {
        let sum: f64 = self.returns.iter().sum();
        IndexCoverage {
            start_year: self.first_year,
            end_year: self.first_year + self.returns.len() as i32 - 1,
            average_return: sum / self.returns.len() as f64,
        }
    }
}

// Calendar-year total returns, 2000..=2023.
const DAX: &[f64] = &[
    -0.075, -0.198, -0.439, 0.371, 0.073, 0.271, 0.220, 0.223, -0.404, 0.238, 0.161, -0.147,
    0.291, 0.255, 0.027, 0.096, 0.069, 0.125, -0.183, 0.255, 0.035, 0.158, -0.123, 0.203,
];

const MSCI_WORLD: &[f64] = &[
    -0.132, -0.168, -0.199, 0.331, 0.147, 0.095, 0.201, 0.090, -0.407, 0.300, 0.118, -0.055,
    0.158, 0.267, 0.049, -0.009, 0.075, 0.224, -0.087, 0.277, 0.159, 0.218, -0.181, 0.238,
];

const SP500: &[f64] = &[
    -0.091, -0.119, -0.221, 0.287, 0.109, 0.049, 0.158, 0.055, -0.370, 0.265, 0.151, 0.021,
    0.160, 0.324, 0.137, 0.014, 0.120, 0.218, -0.044, 0.315, 0.184, 0.287, -0.181, 0.263,
];

const TABLES: &[IndexTable] = &[
    IndexTable {
        id: "dax",
        name: "DAX",
        first_year: 2000,
        returns: DAX,
    },
    IndexTable {
        id: "msci-world",
        name: "MSCI World",
        first_year: 2000,
        returns: MSCI_WORLD,
    },
    IndexTable {
        id: "sp500",
        name: "S&P 500",
        first_year: 2000,
        returns: SP500,
    },
];

/// Compiled-in index history used when the caller supplies no data source.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinIndices;

impl BuiltinIndices {
    fn table(index: &str) -> Option<&'static IndexTable> {
        TABLES.iter().find(|t| t.id.eq_ignore_ascii_case(index))
    }

    pub fn list() -> Vec<IndexSummary> {
        TABLES
            .iter()
            .map(|t| IndexSummary {
                id: t.id,
                name: t.name,
                coverage: t.coverage(),
            })
            .collect()
    }
}

impl HistoricalIndexData for BuiltinIndices {
    fn annual_return(&self, index: &str, year: i32) -> Option<f64> {
        Self::table(index).and_then(|t| t.rate(year))
    }

    fn coverage(&self, index: &str) -> Option<IndexCoverage> {
        Self::table(index).map(IndexTable::coverage)
    }
}
