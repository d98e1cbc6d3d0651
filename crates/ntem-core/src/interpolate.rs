//! Linear interpolation of query results onto non-native years.
//!
//! [`interpolate_years`] wraps any year-keyed query: it works out which native
//! years are needed, calls the query once with all of them, and rebuilds the
//! requested years from the returned slices.

use std::collections::{BTreeMap, BTreeSet};

use crate::table::{ResultRow, ResultTable};
use crate::years::YearGrid;
use crate::NtemError;

/// Which native years a request needs and how each non-native year is derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpolationPlan {
    /// Requested years, duplicates removed, caller order kept.
    pub requested: Vec<i32>,
    pub native: BTreeSet<i32>,
    pub brackets: BTreeMap<i32, (i32, i32)>,
}

impl InterpolationPlan {
    pub fn new(grid: &YearGrid, years: &[i32]) -> Result<Self, NtemError> {
        grid.validate()?;
        if years.is_empty() {
            return Err(NtemError::config("at least one year MUST be requested"));
        }

        let mut requested = Vec::with_capacity(years.len());
        let mut native = BTreeSet::new();
        let mut brackets = BTreeMap::new();
        for year in years {
            if requested.contains(year) {
                continue;
            }
            requested.push(*year);
            match grid.brackets(*year) {
                None => {
                    native.insert(*year);
                }
                Some((lower, upper)) => {
                    if *year < grid.low || *year > grid.high {
                        tracing::warn!(
                            year,
                            lower,
                            upper,
                            "extrapolating outside the native year grid"
                        );
                    }
                    native.insert(lower);
                    native.insert(upper);
                    brackets.insert(*year, (lower, upper));
                }
            }
        }

        Ok(Self {
            requested,
            native,
            brackets,
        })
    }

    #[must_use]
    pub fn native_years(&self) -> Vec<i32> {
        self.native.iter().copied().collect()
    }

    /// True when every requested year is native and no arithmetic is needed.
    #[must_use]
    pub fn is_passthrough(&self) -> bool {
        self.brackets.is_empty()
    }
}

/// `value(y) = (upper - lower) / (uy - ly) * (y - ly) + lower`.
#[must_use]
pub fn interpolate_value(
    lower: f64,
    upper: f64,
    lower_year: i32,
    upper_year: i32,
    year: i32,
) -> f64 {
    let span = f64::from(upper_year) - f64::from(lower_year);
    (upper - lower) / span * (f64::from(year) - f64::from(lower_year)) + lower
}

/// Runs `query` once for every native year `years` needs and assembles the requested years.
///
/// Native years are copied through untouched. Output rows follow the requested
/// year order; within a year they keep the query's key order.
pub fn interpolate_years<F, E>(grid: &YearGrid, years: &[i32], query: F) -> Result<ResultTable, E>
where
    F: FnOnce(&[i32]) -> Result<ResultTable, E>,
    E: From<NtemError>,
{
    let plan = InterpolationPlan::new(grid, years)?;
    let native_years = plan.native_years();
    tracing::debug!(requested = ?plan.requested, native = ?native_years, "querying native years");

    let table = query(&native_years)?;
    Ok(assemble(&plan, &table)?)
}

fn assemble(plan: &InterpolationPlan, table: &ResultTable) -> Result<ResultTable, NtemError> {
    let mut by_year: BTreeMap<i32, Vec<&ResultRow>> = BTreeMap::new();
    for row in &table.rows {
        by_year.entry(row.year).or_default().push(row);
    }

    let empty: Vec<i32> = plan
        .native
        .iter()
        .copied()
        .filter(|year| by_year.get(year).map_or(true, Vec::is_empty))
        .collect();
    if !empty.is_empty() {
        let dependants: Vec<i32> = plan
            .requested
            .iter()
            .copied()
            .filter(|year| match plan.brackets.get(year) {
                Some((lower, upper)) => empty.contains(lower) || empty.contains(upper),
                None => empty.contains(year),
            })
            .collect();
        return Err(NtemError::integrity(format!(
            "query returned no rows for native years {empty:?} \
             needed by requested years {dependants:?}"
        )));
    }

    let widest = by_year.values().map(Vec::len).max().unwrap_or_default();
    let mut rows: Vec<ResultRow> = Vec::new();
    rows.try_reserve(widest.saturating_mul(plan.requested.len()))
        .map_err(|err| {
            NtemError::Resource(format!(
                "cannot allocate {} years x {widest} rows of interpolated output ({err}); \
                 request fewer years or aggregate more dimensions",
                plan.requested.len()
            ))
        })?;

    for year in &plan.requested {
        match plan.brackets.get(year) {
            None => {
                let slice = by_year.get(year).map(Vec::as_slice).unwrap_or_default();
                rows.extend(slice.iter().map(|row| (*row).clone()));
            }
            Some((lower_year, upper_year)) => {
                let lower = slice_by_key(by_year.get(lower_year));
                let upper = slice_by_key(by_year.get(upper_year));
                check_alignment(&lower, &upper, *lower_year, *upper_year)?;

                for (key, lower_values) in &lower {
                    let upper_values = upper.get(key).copied().unwrap_or_default();
                    let values = lower_values
                        .iter()
                        .zip(upper_values)
                        .map(|(low, high)| match (low, high) {
                            (Some(low), Some(high)) => Some(interpolate_value(
                                *low,
                                *high,
                                *lower_year,
                                *upper_year,
                                *year,
                            )),
                            _ => None,
                        })
                        .collect();
                    rows.push(ResultRow {
                        key: (*key).to_vec(),
                        year: *year,
                        values,
                    });
                }
            }
        }
    }

    Ok(ResultTable {
        index_names: table.index_names.clone(),
        columns: table.columns.clone(),
        rows,
    })
}

type KeyedSlice<'a> = BTreeMap<&'a [crate::table::KeyValue], &'a [Option<f64>]>;

fn slice_by_key<'a>(rows: Option<&Vec<&'a ResultRow>>) -> KeyedSlice<'a> {
    rows.map(|rows| {
        rows.iter()
            .map(|row| (row.key.as_slice(), row.values.as_slice()))
            .collect()
    })
    .unwrap_or_default()
}

fn check_alignment(
    lower: &KeyedSlice<'_>,
    upper: &KeyedSlice<'_>,
    lower_year: i32,
    upper_year: i32,
) -> Result<(), NtemError> {
    let missing_upper = lower.keys().filter(|key| !upper.contains_key(*key)).count();
    let missing_lower = upper.keys().filter(|key| !lower.contains_key(*key)).count();
    if missing_upper > 0 || missing_lower > 0 {
        return Err(NtemError::integrity(format!(
            "rows for {lower_year} and {upper_year} do not align: \
             {missing_upper} keys only in {lower_year}, {missing_lower} keys only in {upper_year}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use proptest::prelude::*;

    use super::*;
    use crate::table::{KeyValue, LongRow};

    fn must<T>(result: Result<T, NtemError>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("test failure: {err}"),
        }
    }

    /// Linear data per zone: `base + slope * (year - 2011)`.
    fn linear_query(zones: &[(i64, f64, f64)], years: &[i32]) -> Result<ResultTable, NtemError> {
        let mut rows = Vec::new();
        for (zone, base, slope) in zones {
            for year in years {
                rows.push(LongRow {
                    key: vec![*zone],
                    pivot: Some(4),
                    year: *year,
                    value: base + slope * f64::from(year - 2011),
                });
            }
        }
        ResultTable::pivot(vec!["zone".to_string()], rows)
    }

    #[test]
    fn plan_deduplicates_native_years() {
        let plan = must(InterpolationPlan::new(&YearGrid::default(), &[2018, 2019, 2021, 2018]));
        assert_eq!(plan.requested, vec![2018, 2019, 2021]);
        assert_eq!(plan.native_years(), vec![2016, 2021]);
        assert_eq!(plan.brackets.get(&2019), Some(&(2016, 2021)));
        assert!(!plan.is_passthrough());
    }

    #[test]
    fn query_is_called_once_with_all_native_years() {
        let calls = RefCell::new(Vec::new());
        let table = must(interpolate_years(&YearGrid::default(), &[2023, 2018], |years| {
            calls.borrow_mut().push(years.to_vec());
            linear_query(&[(1, 100.0, 10.0)], years)
        }));

        assert_eq!(calls.borrow().as_slice(), &[vec![2016, 2021, 2026]]);
        let years: Vec<i32> = table.rows.iter().map(|row| row.year).collect();
        assert_eq!(years, vec![2023, 2018]);
        assert_eq!(table.value(&["1"], 2018, "4"), Some(170.0));
        assert_eq!(table.value(&["1"], 2023, "4"), Some(220.0));
    }

    #[test]
    fn native_years_pass_through_exactly() {
        let direct = must(linear_query(&[(1, 0.1, 0.3), (2, 7.7, -0.2)], &[2016]));
        let wrapped = must(interpolate_years(&YearGrid::default(), &[2016], |years| {
            linear_query(&[(1, 0.1, 0.3), (2, 7.7, -0.2)], years)
        }));
        assert_eq!(direct, wrapped);
    }

    #[test]
    fn empty_bracket_is_integrity_error_naming_years() {
        let result = interpolate_years(&YearGrid::default(), &[2018], |years| {
            linear_query(&[(1, 1.0, 1.0)], &years[..1])
        });
        match result {
            Err(NtemError::DataIntegrity(message)) => {
                assert!(message.contains("2021"), "{message}");
                assert!(message.contains("2018"), "{message}");
            }
            other => panic!("expected integrity error, got {other:?}"),
        }
    }

    #[test]
    fn misaligned_brackets_are_rejected() {
        let result = interpolate_years(&YearGrid::default(), &[2018], |_| {
            ResultTable::pivot(
                vec!["zone".to_string()],
                vec![
                    LongRow {
                        key: vec![1],
                        pivot: Some(4),
                        year: 2016,
                        value: 1.0,
                    },
                    LongRow {
                        key: vec![2],
                        pivot: Some(4),
                        year: 2021,
                        value: 1.0,
                    },
                ],
            )
        });
        assert!(matches!(result, Err(NtemError::DataIntegrity(_))));
    }

    #[test]
    fn extrapolation_uses_nearest_pair() {
        let table = must(interpolate_years(&YearGrid::default(), &[2066], |years| {
            linear_query(&[(1, 0.0, 2.0)], years)
        }));
        let value = table.value(&["1"], 2066, "4");
        assert!(matches!(value, Some(v) if (v - 110.0).abs() < 1e-9), "{value:?}");
        assert_eq!(table.rows[0].key, vec![KeyValue::Id(1)]);
    }

    #[test]
    fn empty_request_is_configuration_error() {
        let result = interpolate_years(&YearGrid::default(), &[], |years| {
            linear_query(&[(1, 0.0, 1.0)], years)
        });
        assert!(matches!(result, Err(NtemError::Configuration(_))));
    }

    #[test]
    fn year_spans_wider_than_i32_do_not_overflow() {
        let value = interpolate_value(0.0, 1.0, i32::MIN, i32::MAX, 0);
        assert!((value - 0.5).abs() < 1e-6, "{value}");
        let below = interpolate_value(10.0, 20.0, i32::MAX - 10, i32::MAX, i32::MIN);
        assert!(below.is_finite() && below < 0.0, "{below}");
    }

    proptest! {
        #[test]
        fn endpoints_reproduce_bracket_values(
            lower in -1.0e6f64..1.0e6,
            upper in -1.0e6f64..1.0e6,
        ) {
            prop_assert_eq!(interpolate_value(lower, upper, 2016, 2021, 2016), lower);
            let at_upper = interpolate_value(lower, upper, 2016, 2021, 2021);
            prop_assert!((at_upper - upper).abs() <= 1e-9 * (1.0 + upper.abs()));
        }

        #[test]
        fn midpoint_of_linear_data_is_mean(base in -1.0e4f64..1.0e4, slope in -1.0e3f64..1.0e3) {
            let grid = YearGrid {
                low: 2010,
                high: 2060,
                step: 10,
            };
            let table = interpolate_years(&grid, &[2015], |years| {
                linear_query(&[(1, base, slope)], years)
            });
            let table = match table {
                Ok(table) => table,
                Err(err) => return Err(TestCaseError::fail(err.to_string())),
            };
            let low = base + slope * f64::from(2010 - 2011);
            let high = base + slope * f64::from(2020 - 2011);
            let got = table.value(&["1"], 2015, "4").unwrap_or(f64::NAN);
            prop_assert!((got - (low + high) / 2.0).abs() <= 1e-6 * (1.0 + low.abs() + high.abs()));
        }

        #[test]
        fn monotonic_data_interpolates_monotonically(
            lower in 0.0f64..1.0e6,
            rise in 0.0f64..1.0e6,
        ) {
            let upper = lower + rise;
            let mut previous = lower;
            for year in 2017..2021 {
                let value = interpolate_value(lower, upper, 2016, 2021, year);
                prop_assert!(value >= previous);
                prop_assert!(value <= upper + 1e-9 * (1.0 + upper));
                previous = value;
            }
        }
    }
}
