//! XML form of cache metadata
//!
//! ```text
//! <superblock uuid="" block_size="128" nr_cache_blocks="512" policy="smq" hint_width="4">
//!   <mappings>
//!     <mapping cache_block="0" origin_block="17" dirty="false"/>
//!   </mappings>
//!   <hints>
//!     <hint cache_block="0" data="AAAAAA=="/>
//!   </hints>
//! </superblock>
//! ```
//!
//! Hint payloads are base64. A `<discards>` section is accepted on input
//! and ignored.

use super::ir::{Hint, Map, MetadataVisitor, Superblock, Visit};
use crate::error::{MetadataError, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use std::io::{BufRead, Write};
use std::str::FromStr;

/// Emits metadata as indented XML
pub struct XmlWriter<W: Write> {
    writer: Writer<W>,
}

impl<W: Write> XmlWriter<W> {
    pub fn new(inner: W) -> Self {
        XmlWriter {
            writer: Writer::new_with_indent(inner, b' ', 2),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }

    fn start(&mut self, tag: BytesStart) -> Result<Visit> {
        self.writer.write_event(Event::Start(tag))?;
        Ok(Visit::Continue)
    }

    fn end(&mut self, name: &str) -> Result<Visit> {
        self.writer.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(Visit::Continue)
    }

    fn empty(&mut self, tag: BytesStart) -> Result<Visit> {
        self.writer.write_event(Event::Empty(tag))?;
        Ok(Visit::Continue)
    }
}

impl<W: Write> MetadataVisitor for XmlWriter<W> {
    fn superblock_b(&mut self, sb: &Superblock) -> Result<Visit> {
        let block_size = sb.block_size.to_string();
        let nr_cache_blocks = sb.nr_cache_blocks.to_string();
        let hint_width = sb.hint_width.to_string();

        self.start(BytesStart::new("superblock").with_attributes([
            ("uuid", sb.uuid.as_str()),
            ("block_size", block_size.as_str()),
            ("nr_cache_blocks", nr_cache_blocks.as_str()),
            ("policy", sb.policy.as_str()),
            ("hint_width", hint_width.as_str()),
        ]))
    }

    fn superblock_e(&mut self) -> Result<Visit> {
        self.end("superblock")
    }

    fn mappings_b(&mut self) -> Result<Visit> {
        self.start(BytesStart::new("mappings"))
    }

    fn mappings_e(&mut self) -> Result<Visit> {
        self.end("mappings")
    }

    fn mapping(&mut self, m: &Map) -> Result<Visit> {
        let cblock = m.cblock.to_string();
        let oblock = m.oblock.to_string();

        self.empty(BytesStart::new("mapping").with_attributes([
            ("cache_block", cblock.as_str()),
            ("origin_block", oblock.as_str()),
            ("dirty", if m.dirty { "true" } else { "false" }),
        ]))
    }

    fn hints_b(&mut self) -> Result<Visit> {
        self.start(BytesStart::new("hints"))
    }

    fn hints_e(&mut self) -> Result<Visit> {
        self.end("hints")
    }

    fn hint(&mut self, h: &Hint) -> Result<Visit> {
        let cblock = h.cblock.to_string();
        let data = STANDARD.encode(&h.data);

        self.empty(BytesStart::new("hint").with_attributes([
            ("cache_block", cblock.as_str()),
            ("data", data.as_str()),
        ]))
    }

    fn eof(&mut self) -> Result<Visit> {
        let out = self.writer.get_mut();
        out.write_all(b"\n")?;
        out.flush()?;
        Ok(Visit::Continue)
    }
}

/// Attributes of one element, unescaped
struct Attrs<'a> {
    tag: &'a str,
    values: Vec<(String, String)>,
}

impl<'a> Attrs<'a> {
    fn parse(tag: &'a str, e: &BytesStart) -> Result<Self> {
        let mut values = Vec::new();
        for attr in e.attributes() {
            let attr = attr?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            values.push((key, value));
        }
        Ok(Attrs { tag, values })
    }

    fn get(&self, name: &str) -> Result<&str> {
        self.values
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
            .ok_or_else(|| {
                MetadataError::Xml(format!("missing attribute '{}' on <{}>", name, self.tag))
            })
    }

    fn parse_value<T: FromStr>(&self, name: &str) -> Result<T> {
        let raw = self.get(name)?;
        raw.parse().map_err(|_| {
            MetadataError::Xml(format!(
                "bad value '{}' for attribute '{}' on <{}>",
                raw, name, self.tag
            ))
        })
    }
}

fn parse_superblock(e: &BytesStart) -> Result<Superblock> {
    let attrs = Attrs::parse("superblock", e)?;
    Ok(Superblock {
        uuid: attrs.get("uuid")?.to_string(),
        block_size: attrs.parse_value("block_size")?,
        nr_cache_blocks: attrs.parse_value("nr_cache_blocks")?,
        policy: attrs.get("policy")?.to_string(),
        hint_width: attrs.parse_value("hint_width")?,
    })
}

fn parse_mapping(e: &BytesStart) -> Result<Map> {
    let attrs = Attrs::parse("mapping", e)?;
    Ok(Map {
        cblock: attrs.parse_value("cache_block")?,
        oblock: attrs.parse_value("origin_block")?,
        dirty: attrs.parse_value("dirty")?,
    })
}

fn parse_hint(e: &BytesStart) -> Result<Hint> {
    let attrs = Attrs::parse("hint", e)?;
    let data = STANDARD
        .decode(attrs.get("data")?)
        .map_err(|err| MetadataError::Xml(format!("bad hint data: {}", err)))?;

    Ok(Hint {
        cblock: attrs.parse_value("cache_block")?,
        data,
    })
}

fn start_tag<V: MetadataVisitor + ?Sized>(e: &BytesStart, visitor: &mut V) -> Result<Visit> {
    match e.name().as_ref() {
        b"superblock" => visitor.superblock_b(&parse_superblock(e)?),
        b"mappings" => visitor.mappings_b(),
        b"mapping" => visitor.mapping(&parse_mapping(e)?),
        b"hints" => visitor.hints_b(),
        b"hint" => visitor.hint(&parse_hint(e)?),
        b"discards" | b"discard" => Ok(Visit::Continue),
        other => Err(MetadataError::Xml(format!(
            "unexpected element <{}>",
            String::from_utf8_lossy(other)
        ))),
    }
}

fn end_tag<V: MetadataVisitor + ?Sized>(name: &[u8], visitor: &mut V) -> Result<Visit> {
    match name {
        b"superblock" => visitor.superblock_e(),
        b"mappings" => visitor.mappings_e(),
        b"hints" => visitor.hints_e(),
        _ => Ok(Visit::Continue),
    }
}

/// Parse XML metadata, driving `visitor` until the document ends or the
/// visitor asks to stop
pub fn read<R: BufRead, V: MetadataVisitor + ?Sized>(input: R, visitor: &mut V) -> Result<()> {
    let mut reader = Reader::from_reader(input);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    loop {
        let visit = match reader.read_event_into(&mut buf)? {
            Event::Start(e) => start_tag(&e, visitor)?,
            Event::Empty(e) => match start_tag(&e, visitor)? {
                Visit::Continue => end_tag(e.name().as_ref(), visitor)?,
                Visit::Stop => Visit::Stop,
            },
            Event::End(e) => end_tag(e.name().as_ref(), visitor)?,
            Event::Eof => {
                visitor.eof()?;
                break;
            }
            _ => Visit::Continue,
        };

        if visit == Visit::Stop {
            break;
        }
        buf.clear();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
        superblock: Option<Superblock>,
        mappings: Vec<Map>,
        hints: Vec<Hint>,
    }

    impl MetadataVisitor for Recorder {
        fn superblock_b(&mut self, sb: &Superblock) -> Result<Visit> {
            self.superblock = Some(sb.clone());
            self.events.push("superblock_b".into());
            Ok(Visit::Continue)
        }
        fn superblock_e(&mut self) -> Result<Visit> {
            self.events.push("superblock_e".into());
            Ok(Visit::Continue)
        }
        fn mappings_b(&mut self) -> Result<Visit> {
            self.events.push("mappings_b".into());
            Ok(Visit::Continue)
        }
        fn mappings_e(&mut self) -> Result<Visit> {
            self.events.push("mappings_e".into());
            Ok(Visit::Continue)
        }
        fn mapping(&mut self, m: &Map) -> Result<Visit> {
            self.mappings.push(m.clone());
            Ok(Visit::Continue)
        }
        fn hints_b(&mut self) -> Result<Visit> {
            self.events.push("hints_b".into());
            Ok(Visit::Continue)
        }
        fn hints_e(&mut self) -> Result<Visit> {
            self.events.push("hints_e".into());
            Ok(Visit::Continue)
        }
        fn hint(&mut self, h: &Hint) -> Result<Visit> {
            self.hints.push(h.clone());
            Ok(Visit::Continue)
        }
        fn eof(&mut self) -> Result<Visit> {
            self.events.push("eof".into());
            Ok(Visit::Continue)
        }
    }

    const SAMPLE: &str = r#"<superblock uuid="" block_size="128" nr_cache_blocks="4" policy="smq" hint_width="4">
  <mappings>
    <mapping cache_block="0" origin_block="17" dirty="false"/>
    <mapping cache_block="2" origin_block="3" dirty="true"/>
  </mappings>
  <hints>
    <hint cache_block="0" data="AAAAAA=="/>
    <hint cache_block="2" data="AQIDBA=="/>
  </hints>
  <discards>
    <discard dbegin="0" dend="10"/>
  </discards>
</superblock>
"#;

    #[test]
    fn test_read_sample() {
        let mut recorder = Recorder::default();
        read(SAMPLE.as_bytes(), &mut recorder).unwrap();

        let sb = recorder.superblock.unwrap();
        assert_eq!(sb.block_size, 128);
        assert_eq!(sb.nr_cache_blocks, 4);
        assert_eq!(sb.policy, "smq");
        assert_eq!(
            recorder.mappings[1],
            Map {
                cblock: 2,
                oblock: 3,
                dirty: true
            }
        );
        assert_eq!(recorder.hints[1].data, vec![1, 2, 3, 4]);
        assert_eq!(
            recorder.events,
            vec![
                "superblock_b",
                "mappings_b",
                "mappings_e",
                "hints_b",
                "hints_e",
                "superblock_e",
                "eof"
            ]
        );
    }

    #[test]
    fn test_write_format() {
        let mut writer = XmlWriter::new(Vec::new());
        writer
            .superblock_b(&Superblock {
                uuid: String::new(),
                block_size: 128,
                nr_cache_blocks: 4,
                policy: "smq".to_string(),
                hint_width: 4,
            })
            .unwrap();
        writer.mappings_b().unwrap();
        writer
            .mapping(&Map {
                cblock: 0,
                oblock: 17,
                dirty: false,
            })
            .unwrap();
        writer.mappings_e().unwrap();
        writer.hints_b().unwrap();
        writer
            .hint(&Hint {
                cblock: 0,
                data: vec![0; 4],
            })
            .unwrap();
        writer.hints_e().unwrap();
        writer.superblock_e().unwrap();
        writer.eof().unwrap();

        let text = String::from_utf8(writer.into_inner()).unwrap();
        assert!(text.starts_with(
            r#"<superblock uuid="" block_size="128" nr_cache_blocks="4" policy="smq" hint_width="4">"#
        ));
        assert!(text.contains(r#"    <mapping cache_block="0" origin_block="17" dirty="false"/>"#));
        assert!(text.contains(r#"    <hint cache_block="0" data="AAAAAA=="/>"#));
        assert!(text.ends_with("</superblock>\n"));
    }

    #[test]
    fn test_missing_attribute() {
        let xml = r#"<superblock uuid="" block_size="128" policy="smq" hint_width="4"></superblock>"#;
        let err = read(xml.as_bytes(), &mut Recorder::default()).unwrap_err();
        assert!(err.to_string().contains("nr_cache_blocks"));
    }

    #[test]
    fn test_unknown_element() {
        let xml = r#"<metadata/>"#;
        assert!(matches!(
            read(xml.as_bytes(), &mut Recorder::default()),
            Err(MetadataError::Xml(_))
        ));
    }

    #[test]
    fn test_bad_hint_data() {
        let xml = r#"<superblock uuid="" block_size="1" nr_cache_blocks="1" policy="p" hint_width="4">
  <hints><hint cache_block="0" data="!!!"/></hints>
</superblock>"#;
        assert!(read(xml.as_bytes(), &mut Recorder::default()).is_err());
    }
}
