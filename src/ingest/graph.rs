//! Declarative model of the processing graph and its lifecycle.
//!
//! Backends build real elements from a `GraphSpec`. Attaching a decode chain
//! is a pure transition `(graph, chain) -> graph`, so the invariants can be
//! checked without a media framework present.

use std::fmt;

use super::negotiate::DecodeChain;
use super::IngestError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElementRole {
    Source,
    Depayloader,
    Parser,
    Decoder,
    Convert,
    Sink,
}

impl ElementRole {
    /// Element name inside the graph.
    pub fn name(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Depayloader => "depay",
            Self::Parser => "parse",
            Self::Decoder => "decoder",
            Self::Convert => "convert",
            Self::Sink => "sink",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElementSpec {
    pub role: ElementRole,
    pub factory: &'static str,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GraphSpec {
    elements: Vec<ElementSpec>,
    links: Vec<(ElementRole, ElementRole)>,
    chain: Option<DecodeChain>,
}

impl GraphSpec {
    /// Static skeleton: source, converter, sink. The source links dynamically.
    pub fn skeleton() -> Self {
        Self {
            elements: vec![
                ElementSpec {
                    role: ElementRole::Source,
                    factory: "rtspsrc",
                },
                ElementSpec {
                    role: ElementRole::Convert,
                    factory: "videoconvert",
                },
                ElementSpec {
                    role: ElementRole::Sink,
                    factory: "appsink",
                },
            ],
            links: vec![(ElementRole::Convert, ElementRole::Sink)],
            chain: None,
        }
    }

    /// New graph with `chain` spliced between source and converter.
    ///
    /// Fails if a chain is already attached.
    pub fn with_decode_chain(&self, chain: DecodeChain) -> Result<Self, IngestError> {
        if let Some(existing) = self.chain {
            return Err(IngestError::ChainAlreadyAttached {
                existing: existing.codec,
            });
        }
        let mut next = self.clone();
        next.elements.extend([
            ElementSpec {
                role: ElementRole::Depayloader,
                factory: chain.depayloader,
            },
            ElementSpec {
                role: ElementRole::Parser,
                factory: chain.parser,
            },
            ElementSpec {
                role: ElementRole::Decoder,
                factory: chain.decoder,
            },
        ]);
        next.links.extend([
            (ElementRole::Source, ElementRole::Depayloader),
            (ElementRole::Depayloader, ElementRole::Parser),
            (ElementRole::Parser, ElementRole::Decoder),
            (ElementRole::Decoder, ElementRole::Convert),
        ]);
        next.chain = Some(chain);
        Ok(next)
    }

    pub fn elements(&self) -> &[ElementSpec] {
        &self.elements
    }

    pub fn links(&self) -> &[(ElementRole, ElementRole)] {
        &self.links
    }

    pub fn chain(&self) -> Option<DecodeChain> {
        self.chain
    }

    pub fn element(&self, role: ElementRole) -> Option<&ElementSpec> {
        self.elements.iter().find(|e| e.role == role)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// Lifecycle of one pipeline graph.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PipelineState {
    #[default]
    Null,
    Ready,
    /// Intermediate state the media framework reports between Ready and Playing.
    Paused,
    Playing,
    /// Terminal for a session: explicit stop.
    Stopped,
}

impl PipelineState {
    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        match (self, next) {
            (_, Stopped) => true,
            (Stopped, _) => false,
            // Teardown and bounces go straight back to Null.
            (_, Null) => true,
            (Null, Ready) | (Ready, Playing) => true,
            (Ready, Paused) | (Paused, Playing) | (Playing, Paused) | (Paused, Ready) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Null => "NULL",
            Self::Ready => "READY",
            Self::Paused => "PAUSED",
            Self::Playing => "PLAYING",
            Self::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::negotiate::MediaCodec;

    #[test]
    fn skeleton_has_three_elements_and_one_link() {
        let graph = GraphSpec::skeleton();
        assert_eq!(graph.len(), 3);
        assert_eq!(graph.links(), &[(ElementRole::Convert, ElementRole::Sink)]);
        assert!(graph.chain().is_none());
    }

    #[test]
    fn attaching_a_chain_is_pure() {
        let skeleton = GraphSpec::skeleton();
        let attached = skeleton
            .with_decode_chain(MediaCodec::H264.decode_chain())
            .unwrap();
        assert_eq!(skeleton.len(), 3);
        assert_eq!(attached.len(), 6);
        assert_eq!(
            attached.element(ElementRole::Decoder).map(|e| e.factory),
            Some("avdec_h264")
        );
        assert!(attached
            .links()
            .contains(&(ElementRole::Decoder, ElementRole::Convert)));
    }

    #[test]
    fn second_chain_is_rejected() {
        let attached = GraphSpec::skeleton()
            .with_decode_chain(MediaCodec::H265.decode_chain())
            .unwrap();
        assert!(matches!(
            attached.with_decode_chain(MediaCodec::H264.decode_chain()),
            Err(IngestError::ChainAlreadyAttached {
                existing: MediaCodec::H265
            })
        ));
    }

    #[test]
    fn lifecycle_transitions() {
        use PipelineState::*;
        assert!(Null.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Playing));
        assert!(Playing.can_transition_to(Null));
        assert!(!Null.can_transition_to(Playing));
        assert!(Playing.can_transition_to(Stopped));
        assert!(!Stopped.can_transition_to(Ready));
    }
}
