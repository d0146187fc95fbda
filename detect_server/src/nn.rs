//! Object detection with a DETR ONNX model on tract.
//!
use std::{collections::HashMap, path::Path, sync::Arc};

use anyhow::{anyhow, bail, Context, Result};
use common::detection::{BoundingBox, Detection, InvalidDetection};
use futures::{future::BoxFuture, FutureExt};
use image::RgbImage;
use ndarray::{s, ArrayViewD};
use reqwest::Client;
use serde::Deserialize;
use tract_onnx::prelude::*;

use crate::{
    config::ModelSource,
    orchestrator::{ProviderHandle, ProviderLoader},
    utils::resolve_model_files,
};

type NnModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;
type NnOut = TVec<TValue>;

/// ImageNet normalization, as used when DETR was trained.
const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Detection as produced by an inference provider, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub score: f32,
    pub label: String,
    /// `[xmin, ymin, xmax, ymax]` in pixels of the input image.
    pub bbox: [f32; 4],
}

impl RawDetection {
    pub fn into_detection(self) -> Result<Detection, InvalidDetection> {
        let [xmin, ymin, xmax, ymax] = self.bbox;
        Detection::new(
            self.score,
            self.label,
            BoundingBox::new(xmin, ymin, xmax, ymax)?,
        )
    }
}

/// An inference provider: finds objects in an image.
///
/// Implementations are shared between requests and must not need `&mut self`.
pub trait InferModel: Send + Sync {
    fn run(&self, input: &RgbImage, threshold: f32) -> Result<Vec<RawDetection>>;
}

/// Class id to label mapping read from the `id2label` table of a model `config.json`.
#[derive(Debug, Clone, Default)]
pub struct Labels(HashMap<usize, String>);

impl Labels {
    pub fn from_config_json(json: &str) -> Result<Self> {
        #[derive(Deserialize)]
        struct ModelConfig {
            #[serde(default)]
            id2label: HashMap<String, String>,
        }

        let config: ModelConfig = serde_json::from_str(json).context("malformed model config")?;
        let labels = config
            .id2label
            .into_iter()
            .map(|(id, label)| {
                id.parse::<usize>()
                    .map(|id| (id, label))
                    .with_context(|| format!("label id {id:?} is not a number"))
            })
            .collect::<Result<_>>()?;

        Ok(Self(labels))
    }

    pub fn get(&self, class: usize) -> String {
        self.0
            .get(&class)
            .cloned()
            .unwrap_or_else(|| format!("LABEL_{class}"))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// DETR (DEtection TRansformer) running on tract.
///
/// Each tract run executes on the calling thread.
pub struct DetrModel {
    model: NnModel,
    labels: Labels,
    input_size: u32,
    with_pixel_mask: bool,
}

impl DetrModel {
    pub fn load(model_path: &Path, labels: Labels, input_size: u32) -> Result<Self> {
        log::info!("Loading model {}", model_path.display());
        let side = input_size as usize;

        let mut model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("cannot read model {}", model_path.display()))?;
        let with_pixel_mask = model.inputs.len() > 1;

        model = model.with_input_fact(
            0,
            InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
        )?;
        if with_pixel_mask {
            model = model.with_input_fact(
                1,
                InferenceFact::dt_shape(i64::datum_type(), tvec!(1, side, side)),
            )?;
        }

        let model = model.into_optimized()?.into_runnable()?;
        log::info!("Model ready, {} labels", labels.len());

        Ok(Self {
            model,
            labels,
            input_size,
            with_pixel_mask,
        })
    }
}

/// Size of `(width, height)` scaled to fit a `side` x `side` square, keeping the aspect ratio.
pub fn fit_within((width, height): (u32, u32), side: u32) -> (u32, u32) {
    let scale = side as f32 / width.max(height).max(1) as f32;
    let fit = |len: u32| ((len as f32 * scale).round() as u32).clamp(1, side);

    (fit(width), fit(height))
}

/// Normalized `[1, 3, side, side]` model input.
///
/// The image is scaled into the top left corner keeping its aspect ratio; the
/// rest is zero padding.
pub fn preprocess(input: &RgbImage, side: u32) -> tract_ndarray::Array4<f32> {
    let (width, height) = fit_within(input.dimensions(), side);
    let resized: RgbImage =
        image::imageops::resize(input, width, height, image::imageops::FilterType::Triangle);

    tract_ndarray::Array4::from_shape_fn((1, 3, side as usize, side as usize), |(_, c, y, x)| {
        if x < width as usize && y < height as usize {
            (resized[(x as _, y as _)][c] as f32 / 255.0 - MEAN[c]) / STD[c]
        } else {
            0.0
        }
    })
}

/// `[1, side, side]` mask with ones over the `content` area and zeros over the padding.
pub fn pixel_mask((width, height): (u32, u32), side: u32) -> tract_ndarray::Array3<i64> {
    tract_ndarray::Array3::from_shape_fn((1, side as usize, side as usize), |(_, y, x)| {
        i64::from(x < width as usize && y < height as usize)
    })
}

impl InferModel for DetrModel {
    fn run(&self, input: &RgbImage, threshold: f32) -> Result<Vec<RawDetection>> {
        let side = self.input_size;
        let mut inputs: TVec<TValue> = tvec!(Tensor::from(preprocess(input, side)).into());
        if self.with_pixel_mask {
            let content = fit_within(input.dimensions(), side);
            inputs.push(Tensor::from(pixel_mask(content, side)).into());
        }

        let raw_nn_out: NnOut = self.model.run(inputs)?;
        let (logits, boxes) = split_outputs(&raw_nn_out)?;

        decode_detections(
            logits.to_array_view::<f32>()?,
            boxes.to_array_view::<f32>()?,
            &self.labels,
            (input.width(), input.height()),
            threshold,
        )
    }
}

/// Find the class logits `[1, queries, classes + 1]` and the boxes `[1, queries, 4]`.
fn split_outputs(outputs: &NnOut) -> Result<(&Tensor, &Tensor)> {
    if outputs.len() < 2 {
        bail!("expected logits and boxes, model returned {} outputs", outputs.len());
    }

    let boxes = outputs
        .iter()
        .position(|t| t.rank() == 3 && t.shape()[2] == 4)
        .ok_or_else(|| anyhow!("no box output of shape [1, queries, 4]"))?;
    let logits = outputs
        .iter()
        .enumerate()
        .position(|(i, t)| i != boxes && t.rank() == 3)
        .ok_or_else(|| anyhow!("no logits output of shape [1, queries, classes]"))?;

    let logits: &Tensor = &outputs[logits];
    let boxes: &Tensor = &outputs[boxes];
    Ok((logits, boxes))
}

/// Turn DETR outputs into detections in pixel coordinates of a `width` x `height` image.
///
/// Per query, the class with the highest probability wins. Queries won by the
/// trailing "no object" class or not scoring above `threshold` are dropped. Boxes
/// come as normalized `[cx, cy, w, h]` relative to the unpadded image. Query
/// order is kept.
pub fn decode_detections(
    logits: ArrayViewD<f32>,
    boxes: ArrayViewD<f32>,
    labels: &Labels,
    (width, height): (u32, u32),
    threshold: f32,
) -> Result<Vec<RawDetection>> {
    if logits.ndim() != 3
        || boxes.ndim() != 3
        || logits.shape()[1] != boxes.shape()[1]
        || logits.shape()[2] == 0
        || boxes.shape()[2] != 4
    {
        bail!(
            "mismatching output shapes {:?} and {:?}",
            logits.shape(),
            boxes.shape()
        );
    }

    let num_queries = logits.shape()[1];
    let no_object = logits.shape()[2] - 1;
    let (width, height) = (width as f32, height as f32);

    let mut detections = vec![];
    for query in 0..num_queries {
        let probs = softmax(logits.slice(s![0, query, ..]).iter().copied());
        let Some((class, score)) = probs
            .into_iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
        else {
            continue;
        };

        if class == no_object || score <= threshold {
            continue;
        }

        let (cx, cy, w, h) = (
            boxes[[0, query, 0]],
            boxes[[0, query, 1]],
            boxes[[0, query, 2]],
            boxes[[0, query, 3]],
        );
        let corners = [
            ((cx - w / 2.0) * width).clamp(0.0, width),
            ((cy - h / 2.0) * height).clamp(0.0, height),
            ((cx + w / 2.0) * width).clamp(0.0, width),
            ((cy + h / 2.0) * height).clamp(0.0, height),
        ];

        // Boxes collapsed by clamping to the image border carry nothing to draw.
        if corners[0] >= corners[2] || corners[1] >= corners[3] {
            log::debug!("Dropping degenerate box {corners:?} of query {query}");
            continue;
        }

        detections.push(RawDetection {
            score,
            label: labels.get(class),
            bbox: corners,
        });
    }

    log::debug!("{} of {num_queries} queries above {threshold}", detections.len());

    Ok(detections)
}

fn softmax(logits: impl Iterator<Item = f32> + Clone) -> Vec<f32> {
    let max = logits.clone().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.map(|x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();

    exps.into_iter().map(|x| x / sum).collect()
}

/// Loads a [`DetrModel`] from the hub, the download cache or a local directory.
pub struct DetrLoader {
    client: Client,
    source: ModelSource,
}

impl DetrLoader {
    pub fn new(source: ModelSource) -> Self {
        Self {
            client: Client::new(),
            source,
        }
    }
}

impl ProviderLoader for DetrLoader {
    fn load(&self) -> BoxFuture<'static, Result<ProviderHandle>> {
        let client = self.client.clone();
        let source = self.source.clone();

        async move {
            let files = resolve_model_files(&client, &source).await?;
            let config = tokio::fs::read_to_string(&files.config)
                .await
                .with_context(|| format!("cannot read {}", files.config.display()))?;
            let labels = Labels::from_config_json(&config)?;

            // Graph optimization is CPU heavy, keep it off the async workers.
            let input_size = source.input_size;
            let model = tokio::task::spawn_blocking(move || {
                DetrModel::load(&files.model, labels, input_size)
            })
            .await??;

            Ok(Arc::new(model) as ProviderHandle)
        }
        .boxed()
    }
}
