//! Image captioning with an encoder/decoder ONNX export (BLIP layout: a vision
//! encoder producing image embeddings and a text decoder producing logits).
//! Decoding is greedy, so a fixed image always yields the same caption.

use std::fs;
use std::path::Path;

use image::DynamicImage;
use ndarray::{Array2, ArrayD, Axis, Ix3};
use ort::session::{Session, SessionInputValue};
use ort::value::Tensor;
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::ml::engine::{inference_error, input_name, load_session, output_name};
use crate::ml::pipeline::normalize_for_captioner;
use crate::utils::config::CaptionSettings;

const ENCODER_INPUT_SIZE: u32 = 384;

pub trait Captioner {
    fn caption(&self, image: &DynamicImage) -> Result<String>;
}

impl<T: Captioner + ?Sized> Captioner for Box<T> {
    fn caption(&self, image: &DynamicImage) -> Result<String> {
        (**self).caption(image)
    }
}

pub struct OnnxCaptioner {
    encoder: Session,
    decoder: Session,
    vocab: Vec<String>,
    settings: CaptionSettings,
}

impl OnnxCaptioner {
    pub fn load(
        encoder_path: &Path,
        decoder_path: &Path,
        vocab_path: &Path,
        settings: CaptionSettings,
    ) -> Result<Self> {
        let encoder = load_session(encoder_path)?;
        let decoder = load_session(decoder_path)?;
        let vocab = load_vocab(vocab_path)?;
        Ok(Self {
            encoder,
            decoder,
            vocab,
            settings,
        })
    }

    fn encode(&self, image: &DynamicImage) -> Result<ArrayD<f32>> {
        let pixels = normalize_for_captioner(image, ENCODER_INPUT_SIZE);
        let tensor = Tensor::from_array(pixels).map_err(inference_error)?;
        let name = input_name(&self.encoder, 0)?;
        let outputs = self
            .encoder
            .run(ort::inputs![name => tensor].map_err(inference_error)?)
            .map_err(inference_error)?;
        let embeds = outputs[output_name(&self.encoder, 0)?]
            .try_extract_tensor::<f32>()
            .map_err(inference_error)?;
        Ok(embeds.to_owned())
    }

    fn next_token(&self, tokens: &[i64], image_embeds: &ArrayD<f32>) -> Result<i64> {
        let len = tokens.len();
        let ids = Array2::from_shape_vec((1, len), tokens.to_vec())
            .map_err(|e| PipelineError::Inference(e.to_string()))?;

        let mut inputs: Vec<(String, SessionInputValue<'_>)> = Vec::new();
        for input in &self.decoder.inputs {
            let name = input.name.as_str();
            let value: SessionInputValue<'_> = if name.contains("input_ids") {
                Tensor::from_array(ids.clone()).map_err(inference_error)?.into()
            } else if name.contains("attention_mask") {
                Tensor::from_array(Array2::<i64>::ones((1, len)))
                    .map_err(inference_error)?
                    .into()
            } else if name.contains("encoder") || name.contains("image_embeds") {
                Tensor::from_array(image_embeds.clone()).map_err(inference_error)?.into()
            } else {
                return Err(PipelineError::Inference(format!(
                    "caption decoder has unsupported input {:?}",
                    name
                )));
            };
            inputs.push((name.to_string(), value));
        }

        let outputs = self.decoder.run(inputs).map_err(inference_error)?;
        let logits = outputs[output_name(&self.decoder, 0)?]
            .try_extract_tensor::<f32>()
            .map_err(inference_error)?
            .into_dimensionality::<Ix3>()
            .map_err(|e| PipelineError::Inference(format!("unexpected decoder output: {}", e)))?;

        let steps = logits.index_axis(Axis(0), 0);
        let last_step = steps
            .len_of(Axis(0))
            .checked_sub(1)
            .ok_or_else(|| PipelineError::Inference("decoder produced no steps".into()))?;
        argmax(steps.index_axis(Axis(0), last_step).iter().copied())
            .map(|i| i as i64)
            .ok_or_else(|| PipelineError::Inference("decoder produced empty logits".into()))
    }
}

impl Captioner for OnnxCaptioner {
    fn caption(&self, image: &DynamicImage) -> Result<String> {
        let image_embeds = self.encode(image)?;

        let mut tokens = vec![self.settings.bos_token_id];
        for _ in 0..self.settings.max_tokens {
            let next = self.next_token(&tokens, &image_embeds)?;
            if next == self.settings.eos_token_id {
                break;
            }
            tokens.push(next);
        }
        debug!("caption tokens: {:?}", tokens);

        Ok(detokenize(&tokens[1..], &self.vocab))
    }
}

fn argmax(values: impl Iterator<Item = f32>) -> Option<usize> {
    values
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

/// One WordPiece token per line; the line number is the token id.
pub fn load_vocab(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path).map_err(|e| PipelineError::ModelLoad {
        path: path.to_path_buf(),
        message: format!("cannot read vocabulary: {}", e),
    })?;
    let vocab: Vec<String> = text.lines().map(|l| l.trim_end_matches('\r').to_string()).collect();
    if vocab.is_empty() {
        return Err(PipelineError::ModelLoad {
            path: path.to_path_buf(),
            message: "vocabulary is empty".into(),
        });
    }
    Ok(vocab)
}

/// Joins WordPiece tokens, gluing `##` continuations and dropping special
/// `[...]` tokens and unknown ids.
pub fn detokenize(ids: &[i64], vocab: &[String]) -> String {
    let mut text = String::new();
    for &id in ids {
        let Some(token) = usize::try_from(id).ok().and_then(|i| vocab.get(i)) else {
            continue;
        };
        if token.starts_with('[') && token.ends_with(']') {
            continue;
        }
        match token.strip_prefix("##") {
            Some(rest) => text.push_str(rest),
            None => {
                if !text.is_empty() && !is_closing_punctuation(token) {
                    text.push(' ');
                }
                text.push_str(token);
            }
        }
    }
    text
}

fn is_closing_punctuation(token: &str) -> bool {
    matches!(token, "." | "," | "!" | "?" | ":" | ";" | "'s")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab() -> Vec<String> {
        ["[PAD]", "[CLS]", "[SEP]", "a", "woman", "sing", "##ing", "on", "stage", ".", "[unused0]"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn detokenize_merges_word_pieces() {
        let ids = [3, 4, 5, 6, 7, 3, 8, 9];
        assert_eq!(detokenize(&ids, &vocab()), "a woman singing on a stage.");
    }

    #[test]
    fn detokenize_skips_special_and_unknown_ids() {
        let ids = [1, 3, 10, 4, 2, 99, -1];
        assert_eq!(detokenize(&ids, &vocab()), "a woman");
    }

    #[test]
    fn argmax_takes_first_maximum() {
        assert_eq!(argmax([0.1, 0.9, 0.9, -3.0].into_iter()), Some(1));
        assert_eq!(argmax(std::iter::empty()), None);
    }

    #[test]
    fn vocab_file_lines_are_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocab.txt");
        fs::write(&path, "[PAD]\r\nhello\n##s\n").unwrap();
        assert_eq!(load_vocab(&path).unwrap(), vec!["[PAD]", "hello", "##s"]);

        let err = load_vocab(&dir.path().join("missing.txt")).unwrap_err();
        assert!(err.is_fatal());
    }
}
