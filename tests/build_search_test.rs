use std::collections::{BTreeMap, BTreeSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use freesia::{BLOCK_LEN, IndexConfig, IndexMode, InvertedIndex, Searcher};

fn small_config(mode: IndexMode) -> IndexConfig {
    IndexConfig {
        mode,
        df_cutoff: 2,
        segment_words: 1 << 14,
        ..IndexConfig::default()
    }
}

#[test]
fn test_small_corpus_statistics_and_conjunction() -> freesia::Result<()> {
    // 1. Build a tiny corpus with known term distributions.
    let mut index = InvertedIndex::new(small_config(IndexMode::TfOnly));
    index.insert_doc(0, &["apple", "banana", "apple"])?;
    index.insert_doc(1, &["banana", "cherry"])?;
    index.insert_doc(2, &["apple", "cherry", "banana"])?;
    index.insert_doc(3, &["cherry"])?;

    // 2. Verify corpus statistics.
    assert_eq!(index.doc_count(), 4);
    assert_eq!(index.df("apple"), 2);
    assert_eq!(index.cf("apple"), 3);
    assert_eq!(index.df("banana"), 3);
    assert_eq!(index.df("cherry"), 3);
    assert_eq!(index.df("durian"), 0);

    // 3. Flush and intersect.
    index.flush()?;
    let searcher = Searcher::new(&index)?;
    assert_eq!(searcher.bwand_and(&["apple", "banana"], 0)?, vec![0, 2]);
    assert_eq!(searcher.bwand_and(&["banana", "cherry"], 0)?, vec![1, 2]);
    assert_eq!(searcher.svs(&["apple", "banana"], 0)?, vec![0, 2]);
    // "durian" is unknown and contributes nothing to the conjunction.
    assert_eq!(searcher.bwand_and(&["apple", "durian"], 0)?, vec![0, 2]);
    assert!(searcher.bwand_and(&["durian"], 0)?.is_empty());
    Ok(())
}

#[test]
fn test_chain_spans_multiple_blocks() -> freesia::Result<()> {
    let mut index = InvertedIndex::new(small_config(IndexMode::TfOnly));
    let total = BLOCK_LEN as u32 + 5;
    for docid in 0..total {
        index.insert_doc(docid, &["tide"])?;
    }
    index.flush()?;

    let docids = index.term_docids("tide")?;
    assert_eq!(docids, (0..total).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn test_positional_fidelity() -> freesia::Result<()> {
    let mut index = InvertedIndex::new(small_config(IndexMode::Positional));
    index.insert_doc(7, &["to", "be", "or", "not", "to", "be"])?;
    index.insert_doc(9, &["be", "be", "be"])?;
    index.flush()?;

    let postings = index.term_postings("be")?;
    assert_eq!(postings.len(), 2);
    assert_eq!(postings[0].docid, 7);
    assert_eq!(postings[0].tf, 2);
    assert_eq!(postings[0].positions, vec![1, 5]);
    assert_eq!(postings[1].docid, 9);
    assert_eq!(postings[1].tf, 3);
    assert_eq!(postings[1].positions, vec![0, 1, 2]);

    let to = index.term_postings("to")?;
    assert_eq!(to.len(), 1);
    assert_eq!(to[0].positions, vec![0, 4]);
    Ok(())
}

/// A skewed synthetic corpus: a handful of frequent terms, a long tail of
/// rare ones, with docids deliberately non-contiguous.
fn random_corpus(seed: u64, ndocs: usize) -> Vec<(u32, Vec<String>)> {
    let mut rng = StdRng::seed_from_u64(seed);
    let vocabulary: Vec<String> = (0..40).map(|i| format!("term{i}")).collect();
    let mut docs = Vec::with_capacity(ndocs);
    let mut docid = 0u32;
    for _ in 0..ndocs {
        docid += rng.random_range(1..4);
        let len = rng.random_range(1..30);
        let tokens: Vec<String> = (0..len)
            .map(|_| {
                // Square-root bucketing skews the draw toward high
                // indexes, so the vocabulary has frequent and rare terms.
                let bucket = rng.random_range(0..vocabulary.len().pow(2));
                vocabulary[(bucket as f64).sqrt() as usize].clone()
            })
            .collect();
        docs.push((docid, tokens));
    }
    docs
}

fn build_random(seed: u64, ndocs: usize) -> (InvertedIndex, Vec<(u32, Vec<String>)>) {
    let docs = random_corpus(seed, ndocs);
    let mut index = InvertedIndex::new(small_config(IndexMode::TfOnly));
    for (docid, tokens) in &docs {
        let borrowed: Vec<&str> = tokens.iter().map(|t| t.as_str()).collect();
        index.insert_doc(*docid, &borrowed).unwrap();
    }
    index.flush().unwrap();
    (index, docs)
}

fn naive_and(docs: &[(u32, Vec<String>)], terms: &[&str]) -> Vec<u32> {
    // Terms absent from the whole corpus contribute nothing.
    let usable: Vec<&str> = terms
        .iter()
        .copied()
        .filter(|t| docs.iter().any(|(_, tokens)| tokens.iter().any(|x| x == t)))
        .collect();
    if usable.is_empty() {
        return Vec::new();
    }
    docs.iter()
        .filter(|(_, tokens)| {
            let set: BTreeSet<&str> = tokens.iter().map(|t| t.as_str()).collect();
            usable.iter().all(|t| set.contains(t))
        })
        .map(|&(docid, _)| docid)
        .collect()
}

#[test]
fn test_conjunctions_match_naive_on_random_corpus() {
    let (index, docs) = build_random(42, 600);
    let searcher = Searcher::new(&index).unwrap();

    let queries: Vec<Vec<&str>> = vec![
        vec!["term0", "term1"],
        vec!["term0", "term5", "term9"],
        vec!["term2", "term20"],
        vec!["term30", "term35"],
        vec!["term0"],
        vec!["term12", "term13", "term14"],
    ];
    for query in &queries {
        let expected = naive_and(&docs, query);
        assert_eq!(
            searcher.bwand_and(query, 0).unwrap(),
            expected,
            "bwand_and {query:?}"
        );
        assert_eq!(searcher.svs(query, 0).unwrap(), expected, "svs {query:?}");
        // A hits cap returns a prefix of the uncapped result.
        assert_eq!(
            searcher.bwand_and(query, 3).unwrap(),
            expected[..expected.len().min(3)],
            "capped bwand_and {query:?}"
        );
    }
}

fn naive_topk(index: &InvertedIndex, terms: &[&str], k: usize) -> Vec<(u32, f32)> {
    let mut scores: BTreeMap<u32, f32> = BTreeMap::new();
    for term in terms {
        let bound = index.term_upper_bound(term);
        for docid in index.term_docids(term).unwrap() {
            *scores.entry(docid).or_insert(0.0) += bound;
        }
    }
    let mut ranked: Vec<(u32, f32)> = scores.into_iter().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked.truncate(k);
    ranked
}

#[test]
fn test_disjunction_matches_exhaustive_on_random_corpus() {
    let (index, _) = build_random(7, 600);
    let searcher = Searcher::new(&index).unwrap();

    let queries: Vec<Vec<&str>> = vec![
        vec!["term0", "term1", "term2"],
        vec!["term3", "term25", "term39"],
        vec!["term10", "term11", "term12", "term13"],
        vec!["term0", "term38"],
    ];
    for query in &queries {
        for k in [1usize, 5, 20, 100] {
            let got = searcher.bwand_or(query, k).unwrap();
            let want = naive_topk(&index, query, k);
            assert_eq!(got.len(), want.len(), "{query:?} k={k}");
            for (g, (docid, score)) in got.iter().zip(&want) {
                assert_eq!(g.docid, *docid, "{query:?} k={k}");
                assert!(
                    (g.score - score).abs() < 1e-4,
                    "{query:?} k={k}: {} vs {score}",
                    g.score
                );
            }
        }
    }
}

#[test]
fn test_term_upper_bound_is_sound() {
    // Every actual per-term score must stay at or below the stored bound,
    // even as later insertions shift corpus statistics.
    let (index, _) = build_random(1234, 400);
    for i in 0..40 {
        let term = format!("term{i}");
        if index.df(&term) == 0 {
            continue;
        }
        let bound = index.term_upper_bound(&term);
        let idf = freesia::score::idf(index.doc_count(), index.df(&term));
        for posting in index.term_postings(&term).unwrap() {
            let doc_len = index.doc_len(posting.docid).unwrap();
            let actual = idf * freesia::score::tf_norm(posting.tf, doc_len);
            assert!(
                bound >= actual - 1e-5,
                "{term}: bound {bound} below actual {actual} for doc {}",
                posting.docid
            );
        }
    }
}

#[test]
fn test_buffered_postings_block_search_until_flush() {
    let mut index = InvertedIndex::new(small_config(IndexMode::TfOnly));
    index.insert_doc(1, &["a", "b"]).unwrap();
    assert!(Searcher::new(&index).is_err());
    index.flush().unwrap();
    let searcher = Searcher::new(&index).unwrap();
    assert_eq!(searcher.bwand_and(&["a", "b"], 0).unwrap(), vec![1]);
}

#[test]
fn test_incremental_append_after_flush() -> freesia::Result<()> {
    // Flushing is not a seal: more documents can follow, and a second
    // flush extends the existing chains.
    let mut index = InvertedIndex::new(small_config(IndexMode::TfOnly));
    for docid in 0..BLOCK_LEN as u32 {
        index.insert_doc(docid, &["w"])?;
    }
    index.flush()?;
    for docid in BLOCK_LEN as u32..BLOCK_LEN as u32 + 50 {
        index.insert_doc(docid, &["w"])?;
    }
    index.flush()?;

    let docids = index.term_docids("w")?;
    assert_eq!(docids, (0..BLOCK_LEN as u32 + 50).collect::<Vec<_>>());
    let searcher = Searcher::new(&index)?;
    assert_eq!(searcher.bwand_and(&["w"], 0)?.len(), BLOCK_LEN + 50);
    Ok(())
}
