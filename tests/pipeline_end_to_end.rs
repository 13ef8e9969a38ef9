//! End-to-end ingestion against an in-process transport
//!
//! Three submissions: one served zstd-compressed, one plain, one that
//! answers 429 once before succeeding. All three land in a single archive,
//! which is then extracted back to loose directories.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use sgmlvault::accession::Accession;
use sgmlvault::archive::ContainerReader;
use sgmlvault::codec::Compression;
use sgmlvault::config::{IngestConfig, PersistMode};
use sgmlvault::fetch::{BufferedBody, FetchResult, Transport, TransportResponse};
use sgmlvault::pipeline::{FetchRequest, PipelineEvent, ProcessingPipeline};
use sgmlvault::sgml::SubmissionMetadata;
use sgmlvault::storage::LooseStore;

const BASE: &str = "mock://library/";

/// Scripted responses per URL; the last response repeats
struct ScriptedTransport {
    scripts: Mutex<HashMap<String, Vec<(u16, Vec<u8>)>>>,
    hits: Mutex<HashMap<String, usize>>,
}

impl ScriptedTransport {
    fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            hits: Mutex::new(HashMap::new()),
        }
    }

    fn serve(&self, url: String, responses: Vec<(u16, Vec<u8>)>) {
        self.scripts.lock().unwrap().insert(url, responses);
    }

    fn hits(&self, url: &str) -> usize {
        self.hits.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(&self, url: &str) -> FetchResult<TransportResponse> {
        *self.hits.lock().unwrap().entry(url.to_string()).or_default() += 1;

        let (status, body) = {
            let mut scripts = self.scripts.lock().unwrap();
            match scripts.get_mut(url) {
                Some(script) if script.len() > 1 => script.remove(0),
                Some(script) => script[0].clone(),
                None => (404, Vec::new()),
            }
        };
        Ok(TransportResponse {
            status,
            body: Box::new(BufferedBody::new(body, 1024)),
        })
    }
}

fn container(accession: &str, docs: &[(&str, &str)]) -> Vec<u8> {
    let mut out = format!(
        "<SUBMISSION>\n<ACCESSION-NUMBER>{}\n<TYPE>10-Q\n<FILING-DATE>20240115\n<FILER>\n<COMPANY-DATA>\n<CONFORMED-NAME>Example Corp\n</COMPANY-DATA>\n</FILER>\n",
        accession
    );
    for (i, (name, text)) in docs.iter().enumerate() {
        out.push_str(&format!(
            "<DOCUMENT>\n<TYPE>EX-{}\n<SEQUENCE>{}\n<FILENAME>{}\n<TEXT>\n{}</TEXT>\n</DOCUMENT>\n",
            i + 1,
            i + 1,
            name,
            text
        ));
    }
    out.push_str("</SUBMISSION>\n");
    out.into_bytes()
}

fn build(accession: &Accession, docs: &[(&str, String)]) -> Vec<u8> {
    let refs: Vec<(&str, &str)> = docs.iter().map(|(n, t)| (*n, t.as_str())).collect();
    container(&accession.dashed(), &refs)
}

fn body_text(tag: &str, lines: usize) -> String {
    (0..lines)
        .map(|i| format!("{} line {} <B>not a tag</B>\n", tag, i))
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_fetch_decode_archive_extract() {
    let temp = TempDir::new().unwrap();
    let transport = Arc::new(ScriptedTransport::new());

    let a = Accession::from(1001u64);
    let b = Accession::from(1002u64);
    let c = Accession::from(1003u64);

    let a_docs = [("a-main.htm", body_text("alpha", 40)), ("a-ex.txt", body_text("alpha-ex", 2))];
    let b_docs = [("b-main.htm", body_text("bravo", 3))];
    let c_docs = [("c-main.htm", body_text("charlie", 25)), ("c-ex.txt", body_text("charlie-ex", 1))];

    let a_raw = build(&a, &a_docs);
    transport.serve(
        format!("{}{}.sgml.zst", BASE, a.no_dash()),
        vec![(200, Compression::Zstd.compress(&a_raw, 3).unwrap())],
    );
    transport.serve(
        format!("{}{}.sgml", BASE, b.no_dash()),
        vec![(200, build(&b, &b_docs))],
    );
    let c_url = format!("{}{}.sgml", BASE, c.no_dash());
    transport.serve(
        c_url.clone(),
        vec![(429, Vec::new()), (200, build(&c, &c_docs))],
    );

    let mut config = IngestConfig::default();
    config.base_url = BASE.to_string();
    config.output_dir = temp.path().to_path_buf();
    config.persist = PersistMode::Archive;
    config.rate_limit.requests = 100.0;
    config.rate_limit.window_ms = 100;
    config.archive.compression = Compression::Zstd;
    config.archive.compression_threshold = 512;
    config.processing_workers = 2;
    config.decompression_workers = 2;

    let pipeline = ProcessingPipeline::with_transport(config, transport.clone()).unwrap();
    let mut events = pipeline.subscribe();

    let summary = pipeline
        .run(vec![
            FetchRequest::new(a.clone(), true),
            FetchRequest::new(b.clone(), false),
            FetchRequest::new(c.clone(), false),
        ])
        .await
        .unwrap();

    assert_eq!(summary.requested, 3);
    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.metrics.rate_limit_retries, 1);
    assert_eq!(summary.metrics.archives_closed, 1);
    assert_eq!(transport.hits(&c_url), 2);
    assert!(pipeline.ledger().is_empty());

    let mut rate_limited = Vec::new();
    let mut persisted = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            PipelineEvent::RateLimited { accession } => rate_limited.push(accession),
            PipelineEvent::Persisted { .. } => persisted += 1,
            _ => {}
        }
    }
    assert_eq!(rate_limited, vec![c.clone()]);
    assert_eq!(persisted, 3);

    let reader = ContainerReader::new(temp.path());
    let archives = reader.archives().unwrap();
    assert_eq!(archives.len(), 1);
    assert_eq!(reader.accessions().unwrap(), vec![a.clone(), b.clone(), c.clone()]);

    // Large documents were stored compressed and are readable in place.
    let archived_a = reader.read_metadata(&archives[0], &a).unwrap();
    assert_eq!(archived_a.documents[0].compression, Some(Compression::Zstd));
    assert_eq!(archived_a.documents[0].filename.as_deref(), Some("a-main.htm.zst"));
    assert_eq!(
        reader.read_document(&archives[0], &a, "a-main.htm").unwrap(),
        a_docs[0].1.as_bytes()
    );

    let out = temp.path().join("restored");
    let extracted = reader.extract_all(&out, true).unwrap();
    assert_eq!(extracted.submissions, 3);
    assert_eq!(extracted.documents, 5);
    assert!(reader.archives().unwrap().is_empty());

    let loose = LooseStore::new(&out);
    for (accession, docs) in [(&a, &a_docs[..]), (&b, &b_docs[..]), (&c, &c_docs[..])] {
        let metadata_bytes =
            std::fs::read(loose.submission_dir(accession).join("metadata.json")).unwrap();
        let metadata = SubmissionMetadata::from_json(&metadata_bytes).unwrap();
        assert_eq!(&metadata.accession, accession);

        for (descriptor, (name, text)) in metadata.documents.iter().zip(docs) {
            assert_eq!(descriptor.filename.as_deref(), Some(*name));
            assert_eq!(descriptor.compression, None);
            assert_eq!(descriptor.start_byte, None);
            assert_eq!(descriptor.size_bytes, text.len() as u64);
        }

        let stored = loose.load(accession).unwrap();
        let contents: Vec<&[u8]> = docs.iter().map(|(_, t)| t.as_bytes()).collect();
        assert_eq!(stored.contents, contents);
    }
}

#[tokio::test]
async fn test_failed_items_are_retried_from_ledger() {
    let temp = TempDir::new().unwrap();
    let transport = Arc::new(ScriptedTransport::new());
    let accession = Accession::from(77u64);
    let url = format!("{}{}.sgml", BASE, accession.no_dash());
    transport.serve(url.clone(), vec![(503, Vec::new())]);

    let mut config = IngestConfig::default();
    config.base_url = BASE.to_string();
    config.output_dir = temp.path().to_path_buf();
    config.rate_limit.window_ms = 10;

    let first = ProcessingPipeline::with_transport(config.clone(), transport.clone()).unwrap();
    let summary = first
        .run(vec![FetchRequest::new(accession.clone(), false)])
        .await
        .unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(first.ledger().failed_accessions(), vec![accession.clone()]);

    transport.serve(
        url,
        vec![(200, container(&accession.dashed(), &[("doc.txt", "recovered\n")]))],
    );
    let second = ProcessingPipeline::with_transport(config, transport.clone()).unwrap();
    let retry: Vec<_> = second
        .ledger()
        .failed_accessions()
        .into_iter()
        .map(|a| FetchRequest::new(a, false))
        .collect();
    let summary = second.run(retry).await.unwrap();
    assert_eq!(summary.succeeded, 1);
    assert!(second.ledger().is_empty());
    assert!(LooseStore::new(temp.path()).contains(&accession));

    // Nothing left to do on a third pass.
    let pending = sgmlvault::pipeline::pending_requests(
        vec![FetchRequest::new(accession, false)],
        temp.path(),
    )
    .unwrap();
    assert!(pending.is_empty());
}
