use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;
use tracing::{error, warn};

use crate::geo::{GeoClient, MapRegion, join_summaries};
use crate::spot::analysis::{Granularity, Resampled, country_means, resample};
use crate::spot::{PricePoint, SpotGenerator, areas};

const WARN_EMPTY_CHART: &str = "Please select a valid date range and at least one country.";
const WARN_EMPTY_MAP: &str = "No data to display on the map for the selected date range.";

#[derive(Clone)]
struct AppState {
    geo: Arc<GeoClient>,
    sessions: SessionStore,
}

/// Last selection a session made, re-applied when a request omits
/// parameters
#[derive(Debug, Clone)]
struct Selection {
    start: NaiveDate,
    end: NaiveDate,
    step: Granularity,
    countries: Vec<String>,
}

impl Default for Selection {
    fn default() -> Self {
        Self {
            start: NaiveDate::from_ymd_opt(2025, 6, 16).expect("valid default date"),
            end: NaiveDate::from_ymd_opt(2025, 6, 16).expect("valid default date"),
            step: Granularity::Hourly,
            countries: areas::DEFAULT_SELECTION
                .iter()
                .map(|c| c.to_string())
                .collect(),
        }
    }
}

/// In-memory session-keyed store of selections. Nothing here survives a
/// restart, matching the no-persistence scope of the dashboard.
#[derive(Clone, Default)]
struct SessionStore {
    inner: Arc<Mutex<HashMap<String, Selection>>>,
}

impl SessionStore {
    fn get(&self, session: &str) -> Selection {
        self.inner
            .lock()
            .unwrap()
            .get(session)
            .cloned()
            .unwrap_or_default()
    }

    fn put(&self, session: &str, selection: Selection) {
        self.inner
            .lock()
            .unwrap()
            .insert(session.to_string(), selection);
    }
}

#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
    warning: Option<String>,
}

impl<T> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            warning: None,
        }
    }

    fn with_warning(data: T, warning: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            warning: Some(warning.into()),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            warning: None,
        }
    }
}

#[derive(Deserialize)]
struct SpotQuery {
    /// Opaque session identifier; omitted means the shared default session
    session: Option<String>,
    /// ISO dates, inclusive on both ends
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    /// Resampling step: H, D, W or M
    step: Option<String>,
    /// Comma-separated two-letter codes
    countries: Option<String>,
}

/// Merge request parameters over the session's stored selection, store
/// the result back, and return the effective selection.
fn resolve_selection(store: &SessionStore, query: &SpotQuery) -> Result<Selection, String> {
    let session = query.session.as_deref().unwrap_or("default");
    let mut selection = store.get(session);

    if let Some(start) = query.start {
        selection.start = start;
    }
    if let Some(end) = query.end {
        selection.end = end;
    }
    if let Some(step) = &query.step {
        selection.step = step.parse()?;
    }
    if let Some(countries) = &query.countries {
        selection.countries = countries
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(|c| c.to_ascii_uppercase())
            .collect();
    }

    store.put(session, selection.clone());
    Ok(selection)
}

#[derive(Serialize)]
struct CountryInfo {
    code: String,
    region: String,
    name: String,
}

#[derive(Serialize)]
struct CountriesResponse {
    countries: Vec<CountryInfo>,
    default_selection: Vec<String>,
}

/// GET /api/v1/countries
/// Reference table plus the initial selection for a fresh session
async fn list_countries() -> Json<ApiResponse<CountriesResponse>> {
    let countries = areas::COUNTRIES
        .iter()
        .map(|c| CountryInfo {
            code: c.a2.to_string(),
            region: c.a3.to_string(),
            name: c.name.to_string(),
        })
        .collect();

    Json(ApiResponse::success(CountriesResponse {
        countries,
        default_selection: areas::DEFAULT_SELECTION
            .iter()
            .map(|c| c.to_string())
            .collect(),
    }))
}

#[derive(Serialize)]
struct SeriesRow {
    timestamp: String,
    country: String,
    value: f64,
}

/// Flatten an optionally resampled series into chart rows
fn chart_rows(series: Vec<PricePoint>, step: Granularity) -> Vec<SeriesRow> {
    match resample(series, step) {
        Resampled::Hourly(points) => points
            .into_iter()
            .map(|p| SeriesRow {
                timestamp: p.timestamp.to_rfc3339(),
                country: p.country,
                value: p.value,
            })
            .collect(),
        Resampled::Bucketed(rows) => rows
            .into_iter()
            .map(|r| SeriesRow {
                timestamp: r.period_start.to_rfc3339(),
                country: r.country,
                value: r.mean_value,
            })
            .collect(),
    }
}

/// GET /api/v1/spot/chart?session=&start=&end=&step=&countries=
/// Freshly generated series for the selected countries, resampled to the
/// selected step. Empty output carries a warning instead of failing.
async fn get_chart(
    State(state): State<AppState>,
    Query(query): Query<SpotQuery>,
) -> Json<ApiResponse<Vec<SeriesRow>>> {
    let selection = match resolve_selection(&state.sessions, &query) {
        Ok(selection) => selection,
        Err(message) => return Json(ApiResponse::error(message)),
    };

    let codes: Vec<&str> = selection.countries.iter().map(String::as_str).collect();
    let series =
        SpotGenerator::from_entropy().generate(selection.start, selection.end, &codes);
    let rows = chart_rows(series, selection.step);

    if rows.is_empty() {
        return Json(ApiResponse::with_warning(rows, WARN_EMPTY_CHART));
    }
    Json(ApiResponse::success(rows))
}

#[derive(Serialize)]
struct MapData {
    available: bool,
    regions: Vec<MapRegion>,
}

/// GET /api/v1/spot/map?session=&start=&end=
/// Per-country mean over the full range for every table country, merged
/// with boundary geometry. A failed geometry fetch degrades to
/// `available: false`; the rest of the dashboard keeps working.
async fn get_map(
    State(state): State<AppState>,
    Query(query): Query<SpotQuery>,
) -> Json<ApiResponse<MapData>> {
    let selection = match resolve_selection(&state.sessions, &query) {
        Ok(selection) => selection,
        Err(message) => return Json(ApiResponse::error(message)),
    };

    // the map always covers the whole table, not just the chart selection
    let all_codes: Vec<&str> = areas::COUNTRIES.iter().map(|c| c.a2).collect();
    let series =
        SpotGenerator::from_entropy().generate(selection.start, selection.end, &all_codes);

    if series.is_empty() {
        let empty = MapData {
            available: true,
            regions: Vec::new(),
        };
        return Json(ApiResponse::with_warning(empty, WARN_EMPTY_MAP));
    }

    let means = country_means(&series);
    match state.geo.fetch_boundaries().await {
        Ok(boundaries) => Json(ApiResponse::success(MapData {
            available: true,
            regions: join_summaries(boundaries, &means),
        })),
        Err(e) => {
            warn!("boundary fetch failed, map skipped: {e}");
            Json(ApiResponse::with_warning(
                MapData {
                    available: false,
                    regions: Vec::new(),
                },
                "Map unavailable: boundary geometry could not be loaded.",
            ))
        }
    }
}

/// Build Plotly line traces for the chart, one per country
fn chart_plot_data(rows: &[SeriesRow], start: NaiveDate, end: NaiveDate) -> (String, String) {
    let mut per_country: BTreeMap<&str, (Vec<&str>, Vec<f64>)> = BTreeMap::new();
    for row in rows {
        let entry = per_country.entry(&row.country).or_default();
        entry.0.push(&row.timestamp);
        entry.1.push(row.value);
    }

    let traces: Vec<serde_json::Value> = per_country
        .into_iter()
        .map(|(country, (x, y))| {
            serde_json::json!({
                "x": x,
                "y": y,
                "name": country,
                "type": "scatter",
                "mode": "lines"
            })
        })
        .collect();

    let max_value = rows.iter().map(|r| r.value).fold(0.0, f64::max);
    let title = if start == end {
        start.format("%Y-%m-%d").to_string()
    } else {
        format!("{} to {}", start.format("%Y-%m-%d"), end.format("%Y-%m-%d"))
    };

    let layout = serde_json::json!({
        "xaxis": {"title": title, "color": "#d0d0d0", "gridcolor": "#333"},
        "yaxis": {
            "title": "value",
            "range": [0.0, f64::max(155.0, max_value * 1.05)],
            "color": "#d0d0d0",
            "gridcolor": "#333"
        },
        "legend": {"title": {"text": "variable"}},
        "margin": {"l": 20, "r": 20, "t": 40, "b": 20},
        "paper_bgcolor": "#111111",
        "plot_bgcolor": "#1b1b1b",
        "font": {"color": "#d0d0d0"}
    });

    (
        serde_json::to_string(&traces).unwrap(),
        serde_json::to_string(&layout).unwrap(),
    )
}

/// Build the choropleth and its label overlay from joined map regions
fn map_plot_data(regions: &[MapRegion]) -> (String, String) {
    let features: Vec<serde_json::Value> = regions
        .iter()
        .map(|r| {
            serde_json::json!({
                "type": "Feature",
                "id": r.region_code,
                "properties": {"name": r.name},
                "geometry": r.geometry
            })
        })
        .collect();
    let geojson = serde_json::json!({"type": "FeatureCollection", "features": features});

    let locations: Vec<&str> = regions.iter().map(|r| r.region_code.as_str()).collect();
    let z: Vec<serde_json::Value> = regions
        .iter()
        .map(|r| match r.mean_value {
            Some(v) => serde_json::json!(v),
            None => serde_json::Value::Null,
        })
        .collect();
    let labels: Vec<String> = regions
        .iter()
        .map(|r| match r.mean_value {
            Some(v) => format!("{v:.2}"),
            None => String::new(),
        })
        .collect();
    let lons: Vec<f64> = regions.iter().map(|r| r.label_lon).collect();
    let lats: Vec<f64> = regions.iter().map(|r| r.label_lat).collect();

    let traces = serde_json::json!([
        {
            "type": "choropleth",
            "locations": locations,
            "z": z,
            "geojson": geojson,
            "featureidkey": "id",
            "colorscale": "Jet",
            "zmin": 0,
            "zmax": 150,
            "colorbar": {"title": {"text": "base"}, "yanchor": "middle", "y": 0.5, "len": 0.8},
            "marker": {"line": {"color": "darkgray", "width": 0.5}}
        },
        {
            "type": "scattergeo",
            "lon": lons,
            "lat": lats,
            "text": labels,
            "mode": "text",
            "textfont": {"color": "black", "size": 10},
            "showlegend": false
        }
    ]);

    let layout = serde_json::json!({
        "title": {"text": "Map"},
        "margin": {"r": 0, "t": 40, "l": 0, "b": 0},
        "paper_bgcolor": "#111111",
        "font": {"color": "#d0d0d0"},
        "geo": {
            "scope": "europe",
            "bgcolor": "rgba(0,0,0,0)",
            "showland": false,
            "lataxis": {"range": [35, 70]},
            "lonaxis": {"range": [-15, 40]}
        }
    });

    (
        serde_json::to_string(&traces).unwrap(),
        serde_json::to_string(&layout).unwrap(),
    )
}

use askama::Template;

#[derive(Template)]
#[template(path = "dashboard.html")]
struct DashboardTemplate {
    title_range: String,
    data_points: usize,
    warning: String,
    chart_data: String,
    chart_layout: String,
    map_available: bool,
    map_data: String,
    map_layout: String,
}

/// GET /dashboard?session=&start=&end=&step=&countries=
/// Server-rendered page with the line chart and the price map. One
/// panel for all countries feeds the map, the chart shows only the
/// selected subset.
async fn get_dashboard(
    State(state): State<AppState>,
    Query(query): Query<SpotQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let selection =
        resolve_selection(&state.sessions, &query).map_err(|_| StatusCode::BAD_REQUEST)?;

    let all_codes: Vec<&str> = areas::COUNTRIES.iter().map(|c| c.a2).collect();
    let panel =
        SpotGenerator::from_entropy().generate(selection.start, selection.end, &all_codes);

    let chart_series: Vec<PricePoint> = panel
        .iter()
        .filter(|p| selection.countries.contains(&p.country))
        .cloned()
        .collect();
    let rows = chart_rows(chart_series, selection.step);
    let warning = if rows.is_empty() {
        WARN_EMPTY_CHART.to_string()
    } else {
        String::new()
    };
    let (chart_data, chart_layout) = chart_plot_data(&rows, selection.start, selection.end);

    let means = country_means(&panel);
    let (map_available, map_data, map_layout) = if panel.is_empty() {
        (false, String::new(), String::new())
    } else {
        match state.geo.fetch_boundaries().await {
            Ok(boundaries) => {
                let regions = join_summaries(boundaries, &means);
                let (data, layout) = map_plot_data(&regions);
                (true, data, layout)
            }
            Err(e) => {
                warn!("boundary fetch failed, map skipped: {e}");
                (false, String::new(), String::new())
            }
        }
    };

    let template = DashboardTemplate {
        title_range: if selection.start == selection.end {
            selection.start.format("%Y-%m-%d").to_string()
        } else {
            format!(
                "{} to {}",
                selection.start.format("%Y-%m-%d"),
                selection.end.format("%Y-%m-%d")
            )
        },
        data_points: panel.len(),
        warning,
        chart_data,
        chart_layout,
        map_available,
        map_data,
        map_layout,
    };

    let html = template.render().map_err(|e| {
        error!("template rendering error: {e}");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(axum::response::Html(html))
}

/// GET /health
async fn health() -> &'static str {
    "OK"
}

pub async fn start_server() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    areas::verify_bijection()?;

    let state = AppState {
        geo: Arc::new(GeoClient::new()),
        sessions: SessionStore::default(),
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/api/v1/countries", get(list_countries))
        .route("/api/v1/spot/chart", get(get_chart))
        .route("/api/v1/spot/map", get(get_map))
        .route("/dashboard", get(get_dashboard))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("0.0.0.0:3049").await?;
    println!("Server running on http://0.0.0.0:3049");
    println!("\nAvailable endpoints:");
    println!("  GET /health");
    println!("  GET /api/v1/countries");
    println!("  GET /api/v1/spot/chart?session=s1&start=2025-06-16&end=2025-06-18&step=D&countries=DE,FR");
    println!("  GET /api/v1/spot/map?session=s1&start=2025-06-16&end=2025-06-18");
    println!("  GET /dashboard");

    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn query(
        session: Option<&str>,
        start: Option<NaiveDate>,
        step: Option<&str>,
        countries: Option<&str>,
    ) -> SpotQuery {
        SpotQuery {
            session: session.map(String::from),
            start,
            end: start,
            step: step.map(String::from),
            countries: countries.map(String::from),
        }
    }

    #[test]
    fn test_unknown_session_gets_documented_default() {
        let store = SessionStore::default();
        let selection = store.get("nobody");

        assert_eq!(selection.start, date(2025, 6, 16));
        assert_eq!(selection.end, date(2025, 6, 16));
        assert_eq!(selection.step, Granularity::Hourly);
        assert_eq!(selection.countries, ["DE", "FR", "ES", "HU", "GB", "IT"]);
    }

    #[test]
    fn test_selection_persists_across_requests() {
        let store = SessionStore::default();

        let first = query(Some("s1"), Some(date(2025, 7, 1)), Some("W"), Some("de,no"));
        resolve_selection(&store, &first).unwrap();

        // same session, no parameters: the stored selection comes back
        let second = query(Some("s1"), None, None, None);
        let selection = resolve_selection(&store, &second).unwrap();
        assert_eq!(selection.start, date(2025, 7, 1));
        assert_eq!(selection.step, Granularity::Weekly);
        assert_eq!(selection.countries, ["DE", "NO"]);

        // a different session is untouched
        let other = resolve_selection(&store, &query(Some("s2"), None, None, None)).unwrap();
        assert_eq!(other.countries, ["DE", "FR", "ES", "HU", "GB", "IT"]);
    }

    #[test]
    fn test_invalid_step_is_rejected() {
        let store = SessionStore::default();
        let bad = query(None, None, Some("Q"), None);
        let message = resolve_selection(&store, &bad).unwrap_err();
        assert!(message.contains("unknown granularity"));

        // a rejected request must not clobber the stored selection
        assert_eq!(store.get("default").step, Granularity::Hourly);
    }

    #[test]
    fn test_empty_country_parameter_means_empty_selection() {
        let store = SessionStore::default();
        let selection =
            resolve_selection(&store, &query(None, None, None, Some(""))).unwrap();
        assert!(selection.countries.is_empty());
    }

    #[test]
    fn test_chart_rows_respect_step() {
        let series = SpotGenerator::seeded(21).generate(
            date(2025, 6, 16),
            date(2025, 6, 17),
            &["DE"],
        );

        let hourly = chart_rows(series.clone(), Granularity::Hourly);
        assert_eq!(hourly.len(), 48);

        let daily = chart_rows(series, Granularity::Daily);
        assert_eq!(daily.len(), 2);
    }

    #[test]
    fn test_chart_plot_data_layout_floor() {
        let rows = vec![SeriesRow {
            timestamp: "2025-06-16T00:00:00+00:00".to_string(),
            country: "DE".to_string(),
            value: 40.0,
        }];
        let (_, layout) = chart_plot_data(&rows, date(2025, 6, 16), date(2025, 6, 16));
        let layout: serde_json::Value = serde_json::from_str(&layout).unwrap();

        // the y axis never shrinks below the 155 floor
        assert_eq!(layout["yaxis"]["range"][1], 155.0);
        assert_eq!(layout["xaxis"]["title"], "2025-06-16");
    }

    #[test]
    fn test_map_plot_data_null_for_missing_means() {
        let fixture = r#"{
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "id": "DEU",
                "properties": {"name": "Germany"},
                "geometry": {"type": "Polygon", "coordinates": [[[6.0, 47.0], [15.0, 47.0], [15.0, 55.0], [6.0, 55.0], [6.0, 47.0]]]}
            }]
        }"#;
        let boundaries = crate::geo::parse_boundaries(fixture).unwrap();
        let regions = join_summaries(boundaries, &HashMap::new());

        let (traces, _) = map_plot_data(&regions);
        let traces: serde_json::Value = serde_json::from_str(&traces).unwrap();
        assert_eq!(traces[0]["z"][0], serde_json::Value::Null);
        assert_eq!(traces[0]["locations"][0], "DEU");
        assert_eq!(traces[1]["text"][0], "");
    }
}
