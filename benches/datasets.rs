use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::time::Duration;
use tsdelta::{
    DataSet, DataSetResult, Extent, ExtentList, Point, Series, SeriesHeader, SeriesList, Tags,
    TimeRangeQuery, Value,
};

pub const DEFAULT_SEED: u64 = 0x_5453_4445_4C54_4142; // fixed seed for stable benchmarks

pub const SECOND: u64 = 1_000_000_000;

/// A dataset with `series_count` series, each holding one point per `step_secs`
/// over `[start_secs, start_secs + points * step_secs)`.
pub fn generate_dataset(
    seed: u64,
    series_count: usize,
    points: u64,
    start_secs: u64,
    step_secs: u64,
    tag_cardinality: u32,
) -> DataSet {
    assert!(series_count > 0);
    assert!(tag_cardinality > 0);
    assert!(points > 0);

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let start = start_secs * SECOND;
    let step = step_secs * SECOND;
    let end = start + (points - 1) * step;

    let trq = TimeRangeQuery::new("bench", start, end, Duration::from_secs(step_secs));
    let mut ds = DataSet::new(Some(trq));
    ds.extent_list = ExtentList(vec![Extent::new(start, end)]);

    let mut list = Vec::with_capacity(series_count);
    for i in 0..series_count {
        let mut tags = Tags::new();
        tags.insert("instance".to_string(), format!("host_{}", i));
        tags.insert("zone".to_string(), format!("z{}", i as u32 % tag_cardinality));
        let mut header = SeriesHeader {
            name: "bench".to_string(),
            tags,
            query_statement: "bench".to_string(),
            ..Default::default()
        };
        header.calculate_size();
        let pts = (0..points)
            .map(|p| {
                let val = rng.random::<u32>() as f64 * 0.001;
                Point::new(start + p * step, vec![Value::Float(val)])
            })
            .collect();
        list.push(Series::new(header, pts));
    }
    ds.results.push(DataSetResult::new(0, SeriesList(list)));
    ds
}

/// Rows for the tabular parser: one header row, then `series_count` interleaved series.
pub fn generate_rows(seed: u64, series_count: usize, points: u64, step_secs: u64) -> Vec<Vec<String>> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut rows = Vec::with_capacity(series_count * points as usize + 1);
    rows.push(vec!["time".to_string(), "instance".to_string(), "value".to_string()]);
    for p in 0..points {
        for s in 0..series_count {
            rows.push(vec![
                (p * step_secs).to_string(),
                format!("host_{}", s),
                format!("{:.3}", rng.random::<u32>() as f64 * 0.001),
            ]);
        }
    }
    rows
}

/// A fragmented coverage list: `count` extents of `width_secs` separated by gaps.
pub fn generate_extents(seed: u64, count: usize, width_secs: u64, step_secs: u64) -> ExtentList {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut out = Vec::with_capacity(count);
    let mut t = 0u64;
    for _ in 0..count {
        let gap = rng.random_range(1..8u64) * step_secs;
        t += gap;
        out.push(Extent::new(t * SECOND, (t + width_secs) * SECOND));
        t += width_secs;
    }
    ExtentList(out)
}
