//! Derived dashboard views over the full application set.
//!
//! Every function here is pure: it reads a snapshot and returns owned results, and an
//! empty snapshot yields an empty result rather than an error.

use std::collections::{BTreeMap, HashSet};

use apptrack_core::{Application, OfficeParticipation};
use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;

pub const CRATE_NAME: &str = "apptrack-metrics";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SummaryCounts {
    pub applications_created: usize,
    pub rejection_count: usize,
    pub responses: usize,
    pub offers: usize,
}

/// Headline counters. A rejection that never reached recruiter screen still counts as
/// a response: any closure is a response.
pub fn summary_counts(apps: &[Application]) -> SummaryCounts {
    let screened = apps.iter().filter(|a| a.recruiter_screen).count();
    let straight_rejections = apps
        .iter()
        .filter(|a| !a.recruiter_screen && a.rejection)
        .count();
    SummaryCounts {
        applications_created: apps.len(),
        rejection_count: apps.iter().filter(|a| a.rejection).count(),
        responses: screened + straight_rejections,
        offers: apps.iter().filter(|a| a.offer).count(),
    }
}

pub const HEATMAP_WINDOW_DAYS: i64 = 180;

/// Shifts month labels back by roughly half a month so they sit under their columns.
/// Display heuristic only.
pub const MONTH_LABEL_OFFSET_DAYS: f64 = 15.0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeatmapCell {
    pub date: NaiveDate,
    pub week_number: u32,
    /// 0 = Monday .. 6 = Sunday.
    pub week_day: u32,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthTick {
    pub label: String,
    pub position: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityHeatmap {
    pub cells: Vec<HeatmapCell>,
    pub month_ticks: Vec<MonthTick>,
}

impl ActivityHeatmap {
    pub fn count_at(&self, week_number: u32, week_day: u32) -> Option<usize> {
        self.cells
            .iter()
            .find(|c| c.week_number == week_number && c.week_day == week_day)
            .map(|c| c.count)
    }

    pub fn total(&self) -> usize {
        self.cells.iter().map(|c| c.count).sum()
    }

    pub fn weeks(&self) -> u32 {
        self.cells.last().map(|c| c.week_number).unwrap_or(0)
    }
}

/// Gap-free daily spine over the trailing window ending `today`, with its head trimmed
/// so the first entry is a Monday. Counts are zero.
pub fn date_spine(today: NaiveDate) -> Vec<HeatmapCell> {
    let start = today - Duration::days(HEATMAP_WINDOW_DAYS);
    let trim = (7 - start.weekday().num_days_from_monday()) % 7;
    let first = start + Duration::days(i64::from(trim));

    first
        .iter_days()
        .take_while(|d| *d <= today)
        .enumerate()
        .map(|(idx, date)| HeatmapCell {
            date,
            week_number: (idx / 7) as u32 + 1,
            week_day: date.weekday().num_days_from_monday(),
            count: 0,
        })
        .collect()
}

pub fn activity_heatmap(apps: &[Application], today: NaiveDate) -> ActivityHeatmap {
    let mut per_day: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    for app in apps {
        *per_day.entry(app.application_date).or_default() += 1;
    }

    let cells: Vec<HeatmapCell> = date_spine(today)
        .into_iter()
        .map(|mut cell| {
            cell.count = per_day.get(&cell.date).copied().unwrap_or(0);
            cell
        })
        .collect();
    let month_ticks = month_ticks(&cells);

    ActivityHeatmap { cells, month_ticks }
}

fn month_ticks(cells: &[HeatmapCell]) -> Vec<MonthTick> {
    let mut months: Vec<((i32, u32), String, usize)> = Vec::new();
    for cell in cells {
        let key = (cell.date.year(), cell.date.month());
        match months.last_mut() {
            Some((last, _, days)) if *last == key => *days += 1,
            _ => months.push((key, cell.date.format("%B").to_string(), 1)),
        }
    }

    let mut cumulative = 0usize;
    months
        .into_iter()
        .map(|(_, label, days)| {
            cumulative += days;
            MonthTick {
                label,
                position: (cumulative as f64 - MONTH_LABEL_OFFSET_DAYS) / 7.0,
            }
        })
        .collect()
}

pub const PAY_BIN_WIDTH: f64 = 5000.0;
pub const KDE_POINTS: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramBin {
    pub start: f64,
    pub end: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct KdePoint {
    pub x: f64,
    pub y: f64,
}

/// Pay histogram with a density overlay.
///
/// `kde` is a Gaussian density multiplied by `mean_pay` so it sits on roughly the same
/// vertical scale as the histogram counts. It is not a normalised density.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PayDistribution {
    pub mean_pays: Vec<f64>,
    pub histogram: Vec<HistogramBin>,
    pub kde: Vec<KdePoint>,
    pub mean_pay: Option<f64>,
    pub mean_pay_min: Option<f64>,
    pub mean_pay_max: Option<f64>,
}

/// Only records with both bounds set (strictly positive) contribute.
pub fn pay_distribution(apps: &[Application]) -> PayDistribution {
    let priced: Vec<&Application> = apps
        .iter()
        .filter(|a| a.pay_min > 0 && a.pay_max > 0)
        .collect();
    if priced.is_empty() {
        return PayDistribution::default();
    }

    let mean_pays: Vec<f64> = priced
        .iter()
        .map(|a| (a.pay_min as f64 + a.pay_max as f64) / 2.0)
        .collect();
    let mins: Vec<f64> = priced.iter().map(|a| a.pay_min as f64).collect();
    let maxes: Vec<f64> = priced.iter().map(|a| a.pay_max as f64).collect();

    let mean_pay = mean(&mean_pays);
    let kde = match mean_pay {
        Some(scale) => gaussian_kde_curve(&mean_pays, KDE_POINTS)
            .into_iter()
            .map(|p| KdePoint { x: p.x, y: p.y * scale })
            .collect(),
        None => Vec::new(),
    };

    PayDistribution {
        histogram: histogram(&mean_pays, PAY_BIN_WIDTH),
        kde,
        mean_pay,
        mean_pay_min: mean(&mins),
        mean_pay_max: mean(&maxes),
        mean_pays,
    }
}

/// Fixed-width bins aligned to multiples of `bin_width`. Only occupied bins are
/// emitted, so one outlying value cannot blow up the bin count.
pub fn histogram(values: &[f64], bin_width: f64) -> Vec<HistogramBin> {
    let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
    for v in values.iter().filter(|v| v.is_finite()) {
        *counts.entry((v / bin_width).floor() as i64).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(idx, count)| HistogramBin {
            start: idx as f64 * bin_width,
            end: (idx as f64 + 1.0) * bin_width,
            count,
        })
        .collect()
}

/// Gaussian KDE over `points` evenly spaced values between the sample min and max,
/// bandwidth by Scott's rule. Fewer than two samples or zero spread give an empty curve.
pub fn gaussian_kde_curve(samples: &[f64], points: usize) -> Vec<KdePoint> {
    let n = samples.len();
    let Some(sd) = sample_std(samples) else {
        return Vec::new();
    };
    if sd == 0.0 || points == 0 {
        return Vec::new();
    }
    let bandwidth = sd * (n as f64).powf(-0.2);
    let norm = 1.0 / (n as f64 * bandwidth * (2.0 * std::f64::consts::PI).sqrt());

    let (lo, hi) = match (min_of(samples), max_of(samples)) {
        (Some(lo), Some(hi)) => (lo, hi),
        _ => return Vec::new(),
    };
    let step = if points > 1 { (hi - lo) / (points - 1) as f64 } else { 0.0 };

    (0..points)
        .map(|i| {
            let x = lo + step * i as f64;
            let y = samples
                .iter()
                .map(|s| {
                    let z = (x - s) / bandwidth;
                    (-0.5 * z * z).exp()
                })
                .sum::<f64>()
                * norm;
            KdePoint { x, y }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FiveNumberSummary {
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OfficePayBox {
    pub office_participation: OfficeParticipation,
    pub count: usize,
    pub summary: Option<FiveNumberSummary>,
}

/// Mean pay spread per office arrangement. Records without an arrangement or with a
/// non-positive mean pay are left out.
pub fn pay_by_office(apps: &[Application]) -> Vec<OfficePayBox> {
    OfficeParticipation::ALL
        .iter()
        .map(|&office| {
            let mut values: Vec<f64> = apps
                .iter()
                .filter(|a| a.office_participation == Some(office))
                .map(|a| (a.pay_min as f64 + a.pay_max as f64) / 2.0)
                .filter(|pay| *pay > 0.0)
                .collect();
            values.sort_by(f64::total_cmp);
            OfficePayBox {
                office_participation: office,
                count: values.len(),
                summary: five_number_summary(&values),
            }
        })
        .collect()
}

fn five_number_summary(sorted: &[f64]) -> Option<FiveNumberSummary> {
    Some(FiveNumberSummary {
        min: *sorted.first()?,
        q1: quantile(sorted, 0.25)?,
        median: quantile(sorted, 0.5)?,
        q3: quantile(sorted, 0.75)?,
        max: *sorted.last()?,
    })
}

/// Linear interpolation between closest ranks over already sorted input.
fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * frac)
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

fn min_of(values: &[f64]) -> Option<f64> {
    values.iter().copied().min_by(f64::total_cmp)
}

fn max_of(values: &[f64]) -> Option<f64> {
    values.iter().copied().max_by(f64::total_cmp)
}

pub const FUNNEL_NODES: [&str; 9] = [
    "Cold Application",
    "Network Referral",
    "Recruiter Initiated",
    "Recruiter Screen",
    "Hiring Manager Screen",
    "Technical Screen",
    "No Response",
    "Rejection",
    "Offer",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FunnelNode {
    ColdApplication = 0,
    NetworkReferral = 1,
    RecruiterInitiated = 2,
    RecruiterScreen = 3,
    HiringManagerScreen = 4,
    TechnicalScreen = 5,
    NoResponse = 6,
    Rejection = 7,
    Offer = 8,
}

impl FunnelNode {
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        FUNNEL_NODES[self.index()]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntryChannel {
    Cold,
    Referral,
    Recruiter,
}

/// Referral wins over recruiter when both are set.
pub fn entry_channel(app: &Application) -> EntryChannel {
    if app.refferal {
        EntryChannel::Referral
    } else if app.recruiter {
        EntryChannel::Recruiter
    } else {
        EntryChannel::Cold
    }
}

/// Three-way split of the records that reached one stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageSplit {
    pub advanced: usize,
    pub rejected: usize,
    pub no_response: usize,
}

impl StageSplit {
    fn record(&mut self, advanced: bool, rejected: bool) {
        if advanced {
            self.advanced += 1;
        } else if rejected {
            self.rejected += 1;
        } else {
            self.no_response += 1;
        }
    }

    pub fn total(&self) -> usize {
        self.advanced + self.rejected + self.no_response
    }
}

/// Funnel accounting. Each record enters through exactly one channel and, at every
/// stage it reaches, lands in exactly one of advanced / rejected / no response. A stage
/// is only reached by advancing out of the previous one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FunnelCounts {
    pub cold: StageSplit,
    pub referral: StageSplit,
    pub recruiter: StageSplit,
    pub recruiter_screen: StageSplit,
    pub hiring_manager_screen: StageSplit,
    pub technical_screen: StageSplit,
}

pub fn funnel_counts(apps: &[Application]) -> FunnelCounts {
    let mut counts = FunnelCounts::default();
    for app in apps {
        let entry = match entry_channel(app) {
            EntryChannel::Cold => &mut counts.cold,
            EntryChannel::Referral => &mut counts.referral,
            EntryChannel::Recruiter => &mut counts.recruiter,
        };
        entry.record(app.recruiter_screen, app.rejection);
        if !app.recruiter_screen {
            continue;
        }
        counts
            .recruiter_screen
            .record(app.hiring_manager_screen, app.rejection);
        if !app.hiring_manager_screen {
            continue;
        }
        counts
            .hiring_manager_screen
            .record(app.technical_screen, app.rejection);
        if !app.technical_screen {
            continue;
        }
        counts.technical_screen.record(app.offer, app.rejection);
    }
    counts
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FunnelEdge {
    pub source: usize,
    pub target: usize,
    pub value: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SankeyDiagram {
    pub labels: Vec<&'static str>,
    pub edges: Vec<FunnelEdge>,
}

impl SankeyDiagram {
    pub fn outflow(&self, node: FunnelNode) -> usize {
        self.edges
            .iter()
            .filter(|e| e.source == node.index())
            .map(|e| e.value)
            .sum()
    }

    pub fn inflow(&self, node: FunnelNode) -> usize {
        self.edges
            .iter()
            .filter(|e| e.target == node.index())
            .map(|e| e.value)
            .sum()
    }
}

impl FunnelCounts {
    /// Fixed 18-edge layout, zero-valued edges included.
    pub fn sankey(&self) -> SankeyDiagram {
        use FunnelNode::*;

        let stages = [
            (ColdApplication, RecruiterScreen, self.cold),
            (NetworkReferral, RecruiterScreen, self.referral),
            (RecruiterInitiated, RecruiterScreen, self.recruiter),
            (RecruiterScreen, HiringManagerScreen, self.recruiter_screen),
            (HiringManagerScreen, TechnicalScreen, self.hiring_manager_screen),
            (TechnicalScreen, Offer, self.technical_screen),
        ];

        let edges = stages
            .iter()
            .flat_map(|(source, next, split)| {
                let mut outgoing = [
                    (*next, split.advanced),
                    (NoResponse, split.no_response),
                    (Rejection, split.rejected),
                ];
                outgoing.sort_by_key(|(target, _)| target.index());
                outgoing.into_iter().map(move |(target, value)| FunnelEdge {
                    source: source.index(),
                    target: target.index(),
                    value,
                })
            })
            .collect();

        SankeyDiagram {
            labels: FUNNEL_NODES.to_vec(),
            edges,
        }
    }
}

pub const ENGLISH_STOPWORDS: &[&str] = &[
    "i", "me", "my", "myself", "we", "our", "ours", "ourselves", "you", "you're", "you've",
    "you'll", "you'd", "your", "yours", "yourself", "yourselves", "he", "him", "his",
    "himself", "she", "she's", "her", "hers", "herself", "it", "it's", "its", "itself",
    "they", "them", "their", "theirs", "themselves", "what", "which", "who", "whom", "this",
    "that", "that'll", "these", "those", "am", "is", "are", "was", "were", "be", "been",
    "being", "have", "has", "had", "having", "do", "does", "did", "doing", "a", "an", "the",
    "and", "but", "if", "or", "because", "as", "until", "while", "of", "at", "by", "for",
    "with", "about", "against", "between", "into", "through", "during", "before", "after",
    "above", "below", "to", "from", "up", "down", "in", "out", "on", "off", "over", "under",
    "again", "further", "then", "once", "here", "there", "when", "where", "why", "how", "all",
    "any", "both", "each", "few", "more", "most", "other", "some", "such", "no", "nor", "not",
    "only", "own", "same", "so", "than", "too", "very", "s", "t", "can", "will", "just", "don",
    "don't", "should", "should've", "now", "d", "ll", "m", "o", "re", "ve", "y", "ain",
    "aren", "aren't", "couldn", "couldn't", "didn", "didn't", "doesn", "doesn't", "hadn",
    "hadn't", "hasn", "hasn't", "haven", "haven't", "isn", "isn't", "ma", "mightn",
    "mightn't", "mustn", "mustn't", "needn", "needn't", "shan", "shan't", "shouldn",
    "shouldn't", "wasn", "wasn't", "weren", "weren't", "won", "won't", "wouldn", "wouldn't",
];

/// Job-posting filler that would otherwise dominate the cloud.
pub const DOMAIN_STOPWORDS: &[&str] = &[
    "order", "food", "get", "business", "product", "team", "data", "work", "new", "needs",
    "ensure", "prefered", "strong", "ability", "years", "skills", "proven",
];

#[derive(Debug, Clone)]
pub struct Stopwords {
    words: HashSet<&'static str>,
}

impl Default for Stopwords {
    fn default() -> Self {
        Self {
            words: ENGLISH_STOPWORDS
                .iter()
                .chain(DOMAIN_STOPWORDS.iter())
                .copied()
                .collect(),
        }
    }
}

impl Stopwords {
    pub fn contains(&self, word: &str) -> bool {
        self.words.contains(word)
    }
}

/// Lowercases, splits on whitespace, strips surrounding punctuation and keeps purely
/// alphanumeric tokens that are not stopwords.
pub fn tokenize(text: &str, stopwords: &Stopwords) -> Vec<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(|raw| raw.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|token| !token.is_empty() && token.chars().all(char::is_alphanumeric))
        .filter(|token| !stopwords.contains(token))
        .map(str::to_string)
        .collect()
}

/// Token counts over every record's `requirements` text.
pub fn word_frequencies(apps: &[Application]) -> BTreeMap<String, usize> {
    let stopwords = Stopwords::default();
    let mut freq = BTreeMap::new();
    for text in apps.iter().filter_map(|a| a.requirements.as_deref()) {
        for token in tokenize(text, &stopwords) {
            *freq.entry(token).or_insert(0) += 1;
        }
    }
    freq
}

/// Highest counts first; ties broken alphabetically.
pub fn top_words(freq: &BTreeMap<String, usize>, n: usize) -> Vec<(String, usize)> {
    let mut words: Vec<(String, usize)> = freq.iter().map(|(w, c)| (w.clone(), *c)).collect();
    words.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    words.truncate(n);
    words
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dashboard {
    pub summary: SummaryCounts,
    pub heatmap: ActivityHeatmap,
    pub pay: PayDistribution,
    pub pay_by_office: Vec<OfficePayBox>,
    pub funnel: FunnelCounts,
    pub sankey: SankeyDiagram,
    pub word_frequencies: BTreeMap<String, usize>,
}

impl Dashboard {
    pub fn compute(apps: &[Application], today: NaiveDate) -> Self {
        let funnel = funnel_counts(apps);
        Self {
            summary: summary_counts(apps),
            heatmap: activity_heatmap(apps, today),
            pay: pay_distribution(apps),
            pay_by_office: pay_by_office(apps),
            sankey: funnel.sankey(),
            funnel,
            word_frequencies: word_frequencies(apps),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn app(id: &str) -> Application {
        Application::new_draft(id, day(2026, 3, 2))
    }

    #[test]
    fn counter_scenario() {
        let mut a = app("1");
        a.rejection = true;
        let mut b = app("2");
        b.recruiter_screen = true;
        let c = app("3");

        let counts = summary_counts(&[a, b, c]);
        assert_eq!(
            counts,
            SummaryCounts {
                applications_created: 3,
                rejection_count: 1,
                responses: 2,
                offers: 0,
            }
        );
    }

    #[test]
    fn screened_then_rejected_counts_once_as_response() {
        let mut a = app("1");
        a.recruiter_screen = true;
        a.rejection = true;
        let counts = summary_counts(&[a]);
        assert_eq!(counts.responses, 1);
        assert_eq!(counts.rejection_count, 1);
    }

    #[test]
    fn empty_set_yields_empty_views() {
        let today = day(2026, 3, 2);
        let dash = Dashboard::compute(&[], today);
        assert_eq!(dash.summary, SummaryCounts::default());
        assert_eq!(dash.heatmap.total(), 0);
        assert!(!dash.heatmap.cells.is_empty());
        assert_eq!(dash.pay, PayDistribution::default());
        assert!(dash.pay_by_office.iter().all(|b| b.summary.is_none()));
        assert_eq!(dash.funnel, FunnelCounts::default());
        assert_eq!(dash.sankey.edges.len(), 18);
        assert!(dash.sankey.edges.iter().all(|e| e.value == 0));
        assert!(dash.word_frequencies.is_empty());
    }

    #[test]
    fn spine_starts_on_monday_and_covers_every_day() {
        for offset in 0..7 {
            let today = day(2026, 3, 2) + Duration::days(offset);
            let spine = date_spine(today);

            assert_eq!(spine[0].week_day, 0);
            assert_eq!(spine[0].week_number, 1);
            assert_eq!(spine.last().unwrap().date, today);
            let start = today - Duration::days(HEATMAP_WINDOW_DAYS);
            assert!(spine[0].date >= start && spine[0].date < start + Duration::days(7));

            for pair in spine.windows(2) {
                assert_eq!(pair[1].date, pair[0].date + Duration::days(1));
                assert!(pair[1].week_number >= pair[0].week_number);
            }
            assert!(spine.iter().all(|c| c.week_day <= 6));
            assert!(spine.iter().all(|c| c.week_day == c.date.weekday().num_days_from_monday()));
        }
    }

    #[test]
    fn window_already_on_monday_is_not_trimmed() {
        let today = day(2026, 3, 2);
        let monday_start_today = (0..7)
            .map(|o| today + Duration::days(o))
            .find(|t| (*t - Duration::days(HEATMAP_WINDOW_DAYS)).weekday().num_days_from_monday() == 0)
            .unwrap();
        let spine = date_spine(monday_start_today);
        assert_eq!(spine.len() as i64, HEATMAP_WINDOW_DAYS + 1);
    }

    #[test]
    fn heatmap_counts_land_on_their_day() {
        let today = day(2026, 3, 6);
        let mut a = app("1");
        a.application_date = today;
        let mut b = app("2");
        b.application_date = today;
        let mut old = app("3");
        old.application_date = day(2020, 1, 1);

        let heatmap = activity_heatmap(&[a, b, old], today);
        let last = heatmap.cells.last().unwrap();
        assert_eq!(last.count, 2);
        assert_eq!(last.week_day, 4);
        assert_eq!(heatmap.count_at(last.week_number, 4), Some(2));
        assert_eq!(heatmap.total(), 2);
    }

    #[test]
    fn month_ticks_follow_calendar_order_across_year_end() {
        let today = day(2026, 2, 15);
        let heatmap = activity_heatmap(&[], today);
        let labels: Vec<&str> = heatmap.month_ticks.iter().map(|t| t.label.as_str()).collect();
        assert_eq!(labels.first(), Some(&"August"));
        assert_eq!(&labels[labels.len() - 3..], &["December", "January", "February"]);
        for pair in heatmap.month_ticks.windows(2) {
            assert!(pair[1].position > pair[0].position);
        }
        let total_days = heatmap.cells.len() as f64;
        let last = heatmap.month_ticks.last().unwrap();
        assert!((last.position - (total_days - MONTH_LABEL_OFFSET_DAYS) / 7.0).abs() < 1e-9);
    }

    #[test]
    fn unset_pay_never_contributes() {
        let mut a = app("1");
        a.pay_min = 100_000;
        a.pay_max = 120_000;
        let mut b = app("2");
        b.pay_min = 0;
        b.pay_max = 500_000;
        let mut c = app("3");
        c.pay_min = 90_000;
        c.pay_max = 0;
        let mut d = app("4");
        d.pay_min = 140_000;
        d.pay_max = 160_000;

        let pay = pay_distribution(&[a, b, c, d]);
        assert_eq!(pay.mean_pays, vec![110_000.0, 150_000.0]);
        assert_eq!(pay.mean_pay, Some(130_000.0));
        assert_eq!(pay.mean_pay_min, Some(120_000.0));
        assert_eq!(pay.mean_pay_max, Some(140_000.0));
        assert_eq!(pay.histogram.iter().map(|b| b.count).sum::<usize>(), 2);
        assert_eq!(pay.kde.len(), KDE_POINTS);
        assert_eq!(pay.kde.first().unwrap().x, 110_000.0);
        assert_eq!(pay.kde.last().unwrap().x, 150_000.0);
    }

    #[test]
    fn single_priced_record_has_markers_but_no_curve() {
        let mut a = app("1");
        a.pay_min = 80_000;
        a.pay_max = 100_000;
        let pay = pay_distribution(&[a]);
        assert_eq!(pay.mean_pay, Some(90_000.0));
        assert_eq!(pay.histogram.len(), 1);
        assert_eq!(pay.histogram[0].start, 90_000.0);
        assert!(pay.kde.is_empty());
    }

    #[test]
    fn histogram_uses_fixed_width_bins() {
        let bins = histogram(&[101_000.0, 104_999.0, 105_000.0, 117_500.0], PAY_BIN_WIDTH);
        assert_eq!(bins.len(), 3);
        assert_eq!(bins[0].start, 100_000.0);
        assert_eq!(bins[2].start, 115_000.0);
        assert_eq!(bins[2].end, 120_000.0);
        assert_eq!(bins.iter().map(|b| b.count).collect::<Vec<_>>(), vec![2, 1, 1]);
    }

    #[test]
    fn extreme_pay_keeps_histogram_small() {
        let mut typo = app("1");
        typo.pay_min = 1;
        typo.pay_max = i64::MAX;
        let mut normal = app("2");
        normal.pay_min = 100_000;
        normal.pay_max = 120_000;

        let pay = pay_distribution(&[typo, normal]);
        assert_eq!(pay.mean_pays.len(), 2);
        assert_eq!(pay.histogram.len(), 2);
        assert_eq!(pay.histogram.iter().map(|b| b.count).sum::<usize>(), 2);
        assert_eq!(pay.histogram[0].start, 110_000.0);
        assert_eq!(pay.kde.len(), KDE_POINTS);
        assert!(pay.kde.iter().all(|p| p.x.is_finite() && p.y.is_finite()));
    }

    #[test]
    fn kde_integrates_to_about_one_before_scaling() {
        let samples = [1.0, 2.0, 2.5, 3.0, 7.0];
        let curve = gaussian_kde_curve(&samples, 2000);
        let sd = sample_std(&samples).unwrap();
        // Curve only spans [min, max]; widen with a manual evaluation for the tails.
        let bw = sd * 5f64.powf(-0.2);
        let lo = 1.0 - 8.0 * bw;
        let hi = 7.0 + 8.0 * bw;
        let steps = 20_000;
        let dx = (hi - lo) / steps as f64;
        let norm = 1.0 / (5.0 * bw * (2.0 * std::f64::consts::PI).sqrt());
        let area: f64 = (0..steps)
            .map(|i| {
                let x = lo + dx * (i as f64 + 0.5);
                samples.iter().map(|s| (-0.5 * ((x - s) / bw).powi(2)).exp()).sum::<f64>() * norm * dx
            })
            .sum();
        assert!((area - 1.0).abs() < 1e-3);
        assert_eq!(curve.len(), 2000);
        assert!(curve.iter().all(|p| p.y > 0.0));
    }

    #[test]
    fn office_boxes_skip_unpriced_and_unknown() {
        let mut a = app("1");
        a.office_participation = Some(OfficeParticipation::Remote);
        a.pay_min = 100;
        a.pay_max = 300;
        let mut b = app("2");
        b.office_participation = Some(OfficeParticipation::Remote);
        b.pay_min = 400;
        b.pay_max = 400;
        let mut c = app("3");
        c.office_participation = Some(OfficeParticipation::Hybrid);
        let mut d = app("4");
        d.pay_min = 1000;
        d.pay_max = 1000;

        let boxes = pay_by_office(&[a, b, c, d]);
        assert_eq!(boxes.len(), 3);
        let remote = &boxes[0];
        assert_eq!(remote.office_participation, OfficeParticipation::Remote);
        assert_eq!(remote.count, 2);
        let s = remote.summary.unwrap();
        assert_eq!((s.min, s.median, s.max), (200.0, 300.0, 400.0));
        assert_eq!((s.q1, s.q3), (250.0, 350.0));
        assert!(boxes[1].summary.is_none());
        assert!(boxes[2].summary.is_none());
    }

    #[test]
    fn silent_cold_applications_only_count_as_cold_no_response() {
        let apps: Vec<Application> = (0..4).map(|i| app(&i.to_string())).collect();
        let funnel = funnel_counts(&apps);
        assert_eq!(funnel.cold.no_response, 4);
        assert_eq!(
            FunnelCounts {
                cold: StageSplit::default(),
                ..funnel
            },
            FunnelCounts::default()
        );
    }

    #[test]
    fn referral_takes_precedence_over_recruiter() {
        let mut a = app("1");
        a.refferal = true;
        a.recruiter = true;
        assert_eq!(entry_channel(&a), EntryChannel::Referral);
        a.refferal = false;
        assert_eq!(entry_channel(&a), EntryChannel::Recruiter);
    }

    #[test]
    fn funnel_partition_is_exhaustive_at_every_stage() {
        // Every combination of the eight flags that drive the funnel.
        let mut apps = Vec::new();
        for bits in 0u32..256 {
            let mut a = app(&bits.to_string());
            a.refferal = bits & 1 != 0;
            a.recruiter = bits & 2 != 0;
            a.recruiter_screen = bits & 4 != 0;
            a.hiring_manager_screen = bits & 8 != 0;
            a.technical_screen = bits & 16 != 0;
            a.offer = bits & 32 != 0;
            a.rejection = bits & 64 != 0;
            a.llm = bits & 128 != 0;
            apps.push(a);
        }

        let funnel = funnel_counts(&apps);
        let sankey = funnel.sankey();

        let entries = funnel.cold.total() + funnel.referral.total() + funnel.recruiter.total();
        assert_eq!(entries, apps.len());

        let reached_screen = apps.iter().filter(|a| a.recruiter_screen).count();
        let reached_hm = apps
            .iter()
            .filter(|a| a.recruiter_screen && a.hiring_manager_screen)
            .count();
        let reached_tech = apps
            .iter()
            .filter(|a| a.recruiter_screen && a.hiring_manager_screen && a.technical_screen)
            .count();

        assert_eq!(sankey.inflow(FunnelNode::RecruiterScreen), reached_screen);
        assert_eq!(sankey.outflow(FunnelNode::RecruiterScreen), reached_screen);
        assert_eq!(sankey.inflow(FunnelNode::HiringManagerScreen), reached_hm);
        assert_eq!(sankey.outflow(FunnelNode::HiringManagerScreen), reached_hm);
        assert_eq!(sankey.inflow(FunnelNode::TechnicalScreen), reached_tech);
        assert_eq!(sankey.outflow(FunnelNode::TechnicalScreen), reached_tech);

        let terminal = sankey.inflow(FunnelNode::NoResponse)
            + sankey.inflow(FunnelNode::Rejection)
            + sankey.inflow(FunnelNode::Offer);
        assert_eq!(terminal, apps.len());
    }

    #[test]
    fn sankey_layout_is_fixed() {
        let sankey = FunnelCounts::default().sankey();
        assert_eq!(sankey.labels.len(), 9);
        assert_eq!(sankey.labels[1], "Network Referral");
        let sources: Vec<usize> = sankey.edges.iter().map(|e| e.source).collect();
        let targets: Vec<usize> = sankey.edges.iter().map(|e| e.target).collect();
        assert_eq!(sources, vec![0, 0, 0, 1, 1, 1, 2, 2, 2, 3, 3, 3, 4, 4, 4, 5, 5, 5]);
        assert_eq!(targets, vec![3, 6, 7, 3, 6, 7, 3, 6, 7, 4, 6, 7, 5, 6, 7, 6, 7, 8]);
    }

    #[test]
    fn dashboard_serializes_with_display_labels() {
        let mut a = app("1");
        a.office_participation = Some(OfficeParticipation::OnSite);
        a.pay_min = 100_000;
        a.pay_max = 120_000;

        let json = serde_json::to_value(Dashboard::compute(&[a], day(2026, 3, 2))).unwrap();
        assert_eq!(json["summary"]["applications_created"], 1);
        assert_eq!(json["pay_by_office"][2]["office_participation"], "On-site");
        assert_eq!(json["pay_by_office"][2]["summary"]["median"], 110_000.0);
        assert!(json["pay_by_office"][0]["summary"].is_null());
        assert_eq!(json["pay"]["kde"], serde_json::json!([]));

        let last_cell = json["heatmap"]["cells"].as_array().unwrap().last().unwrap().clone();
        assert_eq!(last_cell["date"], "2026-03-02");
        assert_eq!(last_cell["count"], 1);
        assert_eq!(json["sankey"]["labels"][8], "Offer");
    }

    #[test]
    fn technical_screen_edges_end_with_offer() {
        let funnel = FunnelCounts {
            technical_screen: StageSplit {
                advanced: 2,
                rejected: 1,
                no_response: 3,
            },
            ..FunnelCounts::default()
        };
        let tail: Vec<(usize, usize)> = funnel.sankey().edges[15..]
            .iter()
            .map(|e| (e.target, e.value))
            .collect();
        assert_eq!(
            tail,
            vec![
                (FunnelNode::NoResponse.index(), 3),
                (FunnelNode::Rejection.index(), 1),
                (FunnelNode::Offer.index(), 2),
            ]
        );
    }

    #[test]
    fn stopwords_are_filtered_from_requirements() {
        let mut a = app("1");
        a.requirements = Some("We need strong data skills in Python and SQL for this business role".into());
        let freq = word_frequencies(&[a]);
        for gone in ["strong", "data", "skills", "business", "we", "and"] {
            assert!(!freq.contains_key(gone), "{gone} should be filtered");
        }
        assert_eq!(freq.get("python"), Some(&1));
        assert_eq!(freq.get("sql"), Some(&1));
    }

    #[test]
    fn tokens_are_counted_across_records_and_punctuation_is_dropped() {
        let mut a = app("1");
        a.requirements = Some("Python, SQL; cross-functional (Python)!".into());
        let mut b = app("2");
        b.requirements = Some("python & Spark".into());
        let c = app("3");

        let freq = word_frequencies(&[a, b, c]);
        assert_eq!(freq.get("python"), Some(&3));
        assert_eq!(freq.get("spark"), Some(&1));
        assert!(!freq.contains_key("cross-functional"));
        assert!(!freq.contains_key("&"));

        let top = top_words(&freq, 2);
        assert_eq!(top, vec![("python".to_string(), 3), ("spark".to_string(), 1)]);
    }
}
