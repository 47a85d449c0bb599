//! Tests against the real all-MiniLM-L6-v2 model.
//!
//! These download the model archive on first run and need the ONNX Runtime
//! shared library. Run them with:
//!
//! ```bash
//! ORT_DYLIB_PATH=/path/to/libonnxruntime.so cargo test -- --ignored
//! ```
//!
//! `EMBEDPOOL_DATA_DIR` selects the cache directory (default `./data`).

use std::path::PathBuf;
use std::time::Duration;

use embedpool::embeddings::cosine_similarity;
use embedpool::{Config, EmbeddingPool, EMBEDDING_DIM};

fn config(pool_size: usize) -> Config {
    let data_dir = std::env::var("EMBEDPOOL_DATA_DIR")
        .map_or_else(|_| PathBuf::from("./data"), PathBuf::from);
    Config {
        data_dir,
        pool_size,
        checkout_timeout: Duration::from_secs(120),
        ..Config::default()
    }
}

fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

#[test]
#[ignore = "requires model download and ONNX Runtime"]
fn test_vectors_are_unit_length() {
    let pool = EmbeddingPool::from_config(&config(1)).unwrap();
    let vectors = pool
        .generate(&["The cat sat on the mat", "", "Rust is a systems language"])
        .unwrap();

    assert_eq!(vectors.len(), 3);
    for v in &vectors {
        assert_eq!(v.len(), EMBEDDING_DIM);
        assert!((norm(v) - 1.0).abs() < 1e-4);
    }
}

#[test]
#[ignore = "requires model download and ONNX Runtime"]
fn test_semantic_similarity() {
    let pool = EmbeddingPool::from_config(&config(1)).unwrap();
    let vectors = pool
        .generate(&[
            "The cat sat on the mat",
            "A cat was sitting on a mat",
            "Quantum physics equations",
        ])
        .unwrap();

    assert!(cosine_similarity(&vectors[0], &vectors[1]) > 0.8);
    assert!(cosine_similarity(&vectors[0], &vectors[2]) < 0.5);
}

#[test]
#[ignore = "requires model download and ONNX Runtime"]
fn test_batch_composition_does_not_change_vectors() {
    let pool = EmbeddingPool::from_config(&config(1)).unwrap();
    let short = "hello";
    let long = "a much longer sentence that pads the short one ".repeat(8);

    let alone = pool.generate_one(short).unwrap();
    let batched = pool.generate(&[long.as_str(), short]).unwrap();

    assert!(cosine_similarity(&alone, &batched[1]) > 0.9999);
}

#[test]
#[ignore = "requires model download and ONNX Runtime"]
fn test_forty_texts_match_single_calls() {
    let pool = EmbeddingPool::from_config(&config(1)).unwrap();
    let texts: Vec<String> = (0..40)
        .map(|i| format!("sentence {i} about topic {}", i % 7))
        .collect();

    // 40 texts run as one full batch of 32 and a partial batch of 8.
    let together = pool.generate(&texts).unwrap();
    assert_eq!(together.len(), 40);

    for (text, expected) in texts.iter().zip(&together) {
        let alone = pool.generate_one(text).unwrap();
        assert!(cosine_similarity(&alone, expected) > 0.9999);
    }
}

#[test]
#[ignore = "requires model download and ONNX Runtime"]
fn test_parallel_workers_agree() {
    let pool = EmbeddingPool::from_config(&config(2)).unwrap();
    let expected = pool.generate_one("shared sentence").unwrap();

    std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| s.spawn(|| pool.generate_one("shared sentence")))
            .collect();
        for handle in handles {
            let v = handle.join().unwrap().unwrap();
            assert!(cosine_similarity(&v, &expected) > 0.9999);
        }
    });
}
