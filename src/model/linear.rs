//! Linear ranking model with XML persistence.
//!
//! # Wire format
//!
//! ```xml
//! <ranker>
//!   <info>
//!     <type>LINESEARCH</type>
//!     <num-samples>20</num-samples>
//!     <window-size>1</window-size>
//!     <reduction-factor>0.95</reduction-factor>
//!     <max-iterations>100</max-iterations>
//!     <max-failed-vali>20</max-failed-vali>
//!     <adaptive>0</adaptive>
//!   </info>
//!   <ensemble>
//!     <tree>
//!       <index>1</index>
//!       <weight>0.97014250014533188</weight>
//!     </tree>
//!   </ensemble>
//! </ranker>
//! ```
//!
//! Weights are emitted with shortest-round-trip formatting, so a reload
//! reproduces them bit for bit. The load path tolerates sparse `<index>`
//! values by sizing the weight vector to the maximum observed index and
//! leaving gaps at 0; unknown elements are ignored.

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::data::Dataset;
use crate::training::LineSearchParams;

/// Ranker type tag written into the `<info>` block.
const RANKER_TYPE: &str = "LINESEARCH";

/// Model load/save errors.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model XML is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("expected ranker type `{RANKER_TYPE}`, found `{0}`")]
    WrongType(String),

    #[error("invalid value `{value}` for field `{field}`")]
    InvalidValue { field: &'static str, value: String },

    #[error("malformed model XML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A trained linear ranker: one weight per feature plus the training
/// configuration it was produced with.
#[derive(Debug, Clone, PartialEq)]
pub struct LineSearchModel {
    weights: Vec<f64>,
    num_points: usize,
    window_size: f64,
    reduction_factor: f64,
    max_iterations: usize,
    max_failed_vali: usize,
    adaptive: bool,
}

impl LineSearchModel {
    /// Wrap trained weights together with the parameters that produced them.
    pub fn new(weights: Vec<f64>, params: &LineSearchParams) -> Self {
        Self {
            weights,
            num_points: params.num_points,
            window_size: params.window_size,
            reduction_factor: params.reduction_factor,
            max_iterations: params.max_iterations,
            max_failed_vali: params.max_failed_vali,
            adaptive: params.adaptive,
        }
    }

    /// Trained weights, indexed by feature.
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Number of features the model scores.
    pub fn num_features(&self) -> usize {
        self.weights.len()
    }

    /// Dot-product score of one feature row.
    pub fn score_row(&self, row: &[f32]) -> f64 {
        self.weights
            .iter()
            .zip(row)
            .map(|(&w, &x)| w * x as f64)
            .sum()
    }

    /// Scores for every instance, aligned with the dataset's row order.
    pub fn score_dataset(&self, dataset: &Dataset) -> Vec<f64> {
        (0..dataset.num_instances())
            .map(|s| {
                (0..dataset.num_features().min(self.weights.len()))
                    .map(|f| self.weights[f] * dataset.at(s, f) as f64)
                    .sum()
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Serialization
    // ------------------------------------------------------------------

    /// Serialize to the XML wire format.
    pub fn to_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str("<ranker>\n");
        xml.push_str("\t<info>\n");
        let _ = writeln!(xml, "\t\t<type>{RANKER_TYPE}</type>");
        let _ = writeln!(xml, "\t\t<num-samples>{}</num-samples>", self.num_points);
        let _ = writeln!(xml, "\t\t<window-size>{}</window-size>", self.window_size);
        let _ = writeln!(
            xml,
            "\t\t<reduction-factor>{}</reduction-factor>",
            self.reduction_factor
        );
        let _ = writeln!(
            xml,
            "\t\t<max-iterations>{}</max-iterations>",
            self.max_iterations
        );
        let _ = writeln!(
            xml,
            "\t\t<max-failed-vali>{}</max-failed-vali>",
            self.max_failed_vali
        );
        let _ = writeln!(xml, "\t\t<adaptive>{}</adaptive>", self.adaptive as u8);
        xml.push_str("\t</info>\n");
        xml.push_str("\t<ensemble>\n");
        for (i, &weight) in self.weights.iter().enumerate() {
            xml.push_str("\t\t<tree>\n");
            let _ = writeln!(xml, "\t\t\t<index>{}</index>", i + 1);
            let _ = writeln!(xml, "\t\t\t<weight>{weight}</weight>");
            xml.push_str("\t\t</tree>\n");
        }
        xml.push_str("\t</ensemble>\n");
        xml.push_str("</ranker>\n");
        xml
    }

    /// Parse from the XML wire format.
    pub fn from_xml(xml: &str) -> Result<Self, ModelError> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut stack: Vec<String> = Vec::new();
        let mut info = InfoFields::default();
        let mut trees: Vec<(Option<usize>, Option<f64>)> = Vec::new();

        loop {
            match reader.read_event()? {
                Event::Start(e) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    if name == "tree" && stack.last().is_some_and(|p| p == "ensemble") {
                        trees.push((None, None));
                    }
                    stack.push(name);
                }
                Event::Text(t) => {
                    let text = t.unescape()?;
                    let text = text.trim();
                    let parent = stack
                        .len()
                        .checked_sub(2)
                        .map(|i| stack[i].as_str())
                        .unwrap_or("");
                    let field = stack.last().map(String::as_str).unwrap_or("");
                    match (parent, field) {
                        ("info", "type") => info.ranker_type = Some(text.to_string()),
                        ("info", "num-samples") => {
                            info.num_points = Some(parse(text, "num-samples")?)
                        }
                        ("info", "window-size") => {
                            info.window_size = Some(parse(text, "window-size")?)
                        }
                        ("info", "reduction-factor") => {
                            info.reduction_factor = Some(parse(text, "reduction-factor")?)
                        }
                        ("info", "max-iterations") => {
                            info.max_iterations = Some(parse(text, "max-iterations")?)
                        }
                        ("info", "max-failed-vali") => {
                            info.max_failed_vali = Some(parse(text, "max-failed-vali")?)
                        }
                        ("info", "adaptive") => info.adaptive = Some(parse_bool(text)?),
                        ("tree", "index") => {
                            if let Some(tree) = trees.last_mut() {
                                tree.0 = Some(parse(text, "index")?);
                            }
                        }
                        ("tree", "weight") => {
                            if let Some(tree) = trees.last_mut() {
                                tree.1 = Some(parse(text, "weight")?);
                            }
                        }
                        // Unknown fields are ignored.
                        _ => {}
                    }
                }
                Event::End(_) => {
                    stack.pop();
                }
                Event::Eof => break,
                _ => {}
            }
        }

        let ranker_type = info.ranker_type.ok_or(ModelError::MissingField("type"))?;
        if ranker_type != RANKER_TYPE {
            return Err(ModelError::WrongType(ranker_type));
        }

        // Sparse indices: size to the maximum observed, gaps stay 0.
        let mut max_index = 0usize;
        for &(index, _) in &trees {
            let index = index.ok_or(ModelError::MissingField("index"))?;
            if index == 0 {
                return Err(ModelError::InvalidValue {
                    field: "index",
                    value: "0".into(),
                });
            }
            max_index = max_index.max(index);
        }
        let mut weights = vec![0.0f64; max_index];
        for (index, weight) in trees {
            let index = index.expect("index checked above");
            let weight = weight.ok_or(ModelError::MissingField("weight"))?;
            weights[index - 1] = weight;
        }

        Ok(Self {
            weights,
            num_points: info.num_points.ok_or(ModelError::MissingField("num-samples"))?,
            window_size: info
                .window_size
                .ok_or(ModelError::MissingField("window-size"))?,
            reduction_factor: info
                .reduction_factor
                .ok_or(ModelError::MissingField("reduction-factor"))?,
            max_iterations: info
                .max_iterations
                .ok_or(ModelError::MissingField("max-iterations"))?,
            max_failed_vali: info
                .max_failed_vali
                .ok_or(ModelError::MissingField("max-failed-vali"))?,
            adaptive: info.adaptive.unwrap_or(true),
        })
    }

    /// Write the XML form to a file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        fs::write(path, self.to_xml())
    }

    /// Load a model from an XML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ModelError> {
        Self::from_xml(&fs::read_to_string(path)?)
    }
}

#[derive(Default)]
struct InfoFields {
    ranker_type: Option<String>,
    num_points: Option<usize>,
    window_size: Option<f64>,
    reduction_factor: Option<f64>,
    max_iterations: Option<usize>,
    max_failed_vali: Option<usize>,
    adaptive: Option<bool>,
}

fn parse<T: std::str::FromStr>(text: &str, field: &'static str) -> Result<T, ModelError> {
    text.parse().map_err(|_| ModelError::InvalidValue {
        field,
        value: text.to_string(),
    })
}

fn parse_bool(text: &str) -> Result<bool, ModelError> {
    match text {
        "0" | "false" => Ok(false),
        "1" | "true" => Ok(true),
        other => Err(ModelError::InvalidValue {
            field: "adaptive",
            value: other.to_string(),
        }),
    }
}
