#![allow(dead_code)]

use std::io::Write;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{RawQuery, State};
use axum::http::{header::CONTENT_TYPE, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

pub const ASSET_PATH: &str = "/excel/output_filled.xlsx";

pub const HEADER: [&str; 10] = [
    "qid",
    "title",
    "text",
    "audio1",
    "audio2",
    "type",
    "date",
    "extraMention",
    "isQuestion",
    "id",
];

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn column_name(mut index: usize) -> String {
    let mut name = Vec::new();
    loop {
        name.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    name.reverse();
    String::from_utf8(name).unwrap()
}

/// Single-sheet workbook the way spreadsheet apps write it: text in the
/// shared string table, numeric-looking values as number cells.
pub fn xlsx(rows: &[Vec<&str>]) -> Vec<u8> {
    let mut shared: Vec<String> = Vec::new();
    let mut sheet = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><worksheet xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\"><sheetData>",
    );
    for (r, row) in rows.iter().enumerate() {
        sheet.push_str(&format!("<row r=\"{}\">", r + 1));
        for (c, value) in row.iter().enumerate() {
            if value.is_empty() {
                continue;
            }
            let cell_ref = format!("{}{}", column_name(c), r + 1);
            if value.parse::<f64>().is_ok() {
                sheet.push_str(&format!("<c r=\"{}\"><v>{}</v></c>", cell_ref, value));
            } else {
                let idx = match shared.iter().position(|s| s == value) {
                    Some(i) => i,
                    None => {
                        shared.push(value.to_string());
                        shared.len() - 1
                    }
                };
                sheet.push_str(&format!("<c r=\"{}\" t=\"s\"><v>{}</v></c>", cell_ref, idx));
            }
        }
        sheet.push_str("</row>");
    }
    sheet.push_str("</sheetData></worksheet>");

    let mut sst = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><sst xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\" count=\"{0}\" uniqueCount=\"{0}\">",
        shared.len()
    );
    for s in &shared {
        sst.push_str(&format!("<si><t>{}</t></si>", escape(s)));
    }
    sst.push_str("</sst>");

    let parts: [(&str, String); 5] = [
        (
            "[Content_Types].xml",
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Types xmlns=\"http://schemas.openxmlformats.org/package/2006/content-types\"/>".to_string(),
        ),
        (
            "xl/workbook.xml",
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?><workbook xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\" xmlns:r=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships\"><sheets><sheet name=\"Dialogs\" sheetId=\"1\" r:id=\"rId1\"/></sheets></workbook>".to_string(),
        ),
        (
            "xl/_rels/workbook.xml.rels",
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\"><Relationship Id=\"rId1\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet\" Target=\"worksheets/sheet1.xml\"/></Relationships>".to_string(),
        ),
        ("xl/sharedStrings.xml", sst),
        ("xl/worksheets/sheet1.xml", sheet),
    ];

    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        let opts = zip::write::SimpleFileOptions::default();
        for (name, content) in parts.iter() {
            zip.start_file(*name, opts).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }
    buf
}

/// Header plus one row per `(qid, id)` pair.
pub fn dialog_workbook(rows: &[(&str, &str)]) -> Vec<u8> {
    let mut all = vec![HEADER.to_vec()];
    for &(qid, id) in rows {
        all.push(vec![
            qid,
            "Ordering coffee",
            "我要一杯咖啡",
            "a1.mp3",
            "",
            "type1",
            "2024-03-01",
            "",
            "false",
            id,
        ]);
    }
    xlsx(&all)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Serve,
    Fail(u16),
    Stall,
}

#[derive(Clone)]
struct Shared {
    body: Arc<Mutex<Vec<u8>>>,
    mode: Arc<Mutex<Mode>>,
    hits: Arc<AtomicUsize>,
    queries: Arc<Mutex<Vec<String>>>,
}

/// Local stand-in for the object store.
pub struct AssetServer {
    pub addr: SocketAddr,
    shared: Shared,
}

impl AssetServer {
    pub async fn start(body: Vec<u8>) -> Self {
        let shared = Shared {
            body: Arc::new(Mutex::new(body)),
            mode: Arc::new(Mutex::new(Mode::Serve)),
            hits: Arc::new(AtomicUsize::new(0)),
            queries: Arc::new(Mutex::new(Vec::new())),
        };
        let app = Router::new()
            .route(ASSET_PATH, get(serve_asset))
            .with_state(shared.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, shared }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn hits(&self) -> usize {
        self.shared.hits.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<String> {
        self.shared.queries.lock().unwrap().clone()
    }

    pub fn set_mode(&self, mode: Mode) {
        *self.shared.mode.lock().unwrap() = mode;
    }

    pub fn set_body(&self, body: Vec<u8>) {
        *self.shared.body.lock().unwrap() = body;
    }
}

async fn serve_asset(State(shared): State<Shared>, RawQuery(query): RawQuery) -> Response {
    shared.hits.fetch_add(1, Ordering::SeqCst);
    shared
        .queries
        .lock()
        .unwrap()
        .push(query.unwrap_or_default());
    let mode = *shared.mode.lock().unwrap();
    match mode {
        Mode::Serve => {
            let body = shared.body.lock().unwrap().clone();
            (
                [(
                    CONTENT_TYPE,
                    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
                )],
                body,
            )
                .into_response()
        }
        Mode::Fail(code) => StatusCode::from_u16(code)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            .into_response(),
        Mode::Stall => {
            tokio::time::sleep(Duration::from_secs(30)).await;
            StatusCode::OK.into_response()
        }
    }
}
