use std::sync::Arc;

use ledgerlens_core::domain::document::Document;
use ledgerlens_core::domain::sensitivity::SensitivityLabel::{self, Insider, Product, Public};

use crate::embedding::HashingEmbedder;
use crate::index::InMemoryDocumentIndex;

struct SeedDocument {
    content: &'static str,
    sensitivity: SensitivityLabel,
    source: &'static str,
    category: &'static str,
    year: i32,
}

/// Curated demo corpus: four public filings, three product-planning notes and
/// four confidential insider documents.
const FINANCIAL_CORPUS: &[SeedDocument] = &[
    SeedDocument {
        content: "NVIDIA Q3 Revenue reported at $18.12 Billion, up 206% YoY. Data Center revenue was the primary driver.",
        sensitivity: Public,
        source: "10-Q",
        category: "financials",
        year: 2024,
    },
    SeedDocument {
        content: "The company announced a stock buyback program of $25 Billion.",
        sensitivity: Public,
        source: "Press Release",
        category: "financials",
        year: 2024,
    },
    SeedDocument {
        content: "NVIDIA's gaming segment revenue reached $2.86 billion, showing steady consumer demand.",
        sensitivity: Public,
        source: "10-Q",
        category: "financials",
        year: 2024,
    },
    SeedDocument {
        content: "The company's gross margin improved to 74.0%, up from 70.1% in the previous quarter.",
        sensitivity: Public,
        source: "10-Q",
        category: "financials",
        year: 2024,
    },
    SeedDocument {
        content: "Product Roadmap: Next-gen Blackwell B200 chip targets Q2 2025 launch. Focus on AI training workloads.",
        sensitivity: Product,
        source: "Product Planning",
        category: "roadmap",
        year: 2025,
    },
    SeedDocument {
        content: "Feature prioritization for H100 successor includes 2x memory bandwidth and improved power efficiency.",
        sensitivity: Product,
        source: "Product Planning",
        category: "roadmap",
        year: 2025,
    },
    SeedDocument {
        content: "Customer feedback indicates strong demand for inference-optimized chips in edge computing scenarios.",
        sensitivity: Product,
        source: "Product Research",
        category: "research",
        year: 2024,
    },
    SeedDocument {
        content: "CONFIDENTIAL: Project 'Blackwell' is facing a 3-month delay due to packaging yield issues at TSMC.",
        sensitivity: Insider,
        source: "Internal Memo",
        category: "operations",
        year: 2025,
    },
    SeedDocument {
        content: "CONFIDENTIAL: Legal team is preparing for a potential antitrust inquiry regarding the ARM acquisition attempt.",
        sensitivity: Insider,
        source: "Legal Brief",
        category: "legal",
        year: 2023,
    },
    SeedDocument {
        content: "CONFIDENTIAL: Q4 revenue projection internally revised down by 8% due to supply chain constraints.",
        sensitivity: Insider,
        source: "Internal Forecast",
        category: "financials",
        year: 2024,
    },
    SeedDocument {
        content: "CONFIDENTIAL: Executive compensation packages under review, potential 15% increase for retention.",
        sensitivity: Insider,
        source: "HR Memo",
        category: "hr",
        year: 2024,
    },
];

pub fn financial_corpus() -> Vec<Document> {
    FINANCIAL_CORPUS
        .iter()
        .map(|seed| {
            Document::new(seed.content, seed.sensitivity, seed.source, seed.category, seed.year)
        })
        .collect()
}

/// The demo corpus ingested into a hashing-embedder index.
pub fn seeded_index() -> InMemoryDocumentIndex {
    InMemoryDocumentIndex::with_documents(Arc::new(HashingEmbedder::default()), financial_corpus())
}
