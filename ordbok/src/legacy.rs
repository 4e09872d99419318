//! Read-only decoder for the XML trie payload older clients cached.
//!
//! Shape: a root element whose descendants are prefix elements (`v` holds the
//! prefix spelled so far) and `<w v="headword">` leaves:
//!
//! ```xml
//! <t v="c"><t v="ca"><w v="car"><l>car<s n="N"/></l><r>bil</r></w></t></t>
//! ```

use crate::error::DecodeError;
use crate::trie::{Collation, Entry, Trie};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

#[derive(Default)]
struct WordBuilder {
    headword: Option<String>,
    lemma: String,
    pos: Option<String>,
    translations: Vec<String>,
}

#[derive(Clone, Copy, PartialEq)]
enum Field {
    None,
    Lemma,
    Translation,
}

fn malformed(e: impl std::fmt::Display) -> DecodeError {
    DecodeError::Malformed(e.to_string())
}

fn attribute(e: &BytesStart, name: &[u8]) -> Result<Option<String>, DecodeError> {
    match e.try_get_attribute(name).map_err(malformed)? {
        Some(attr) => Ok(Some(attr.unescape_value().map_err(malformed)?.into_owned())),
        None => Ok(None),
    }
}

pub(crate) fn decode_xml(bytes: &[u8], collation: Collation) -> Result<Trie, DecodeError> {
    let text = std::str::from_utf8(bytes).map_err(malformed)?;
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut trie = Trie::new(collation);
    let mut depth = 0usize;
    let mut saw_root = false;
    let mut word: Option<WordBuilder> = None;
    let mut field = Field::None;

    loop {
        let event = reader.read_event().map_err(|e| {
            DecodeError::Malformed(format!("{} at byte {}", e, reader.buffer_position()))
        })?;
        match event {
            Event::Start(ref e) => {
                depth += 1;
                saw_root = true;
                open_element(e, &mut word, &mut field)?;
            }
            Event::Empty(ref e) => {
                saw_root = true;
                open_element(e, &mut word, &mut field)?;
                close_element(e.name().as_ref(), &mut trie, &mut word, &mut field)?;
            }
            Event::End(ref e) => {
                depth = depth.saturating_sub(1);
                close_element(e.name().as_ref(), &mut trie, &mut word, &mut field)?;
            }
            Event::Text(ref e) => {
                let text = e.unescape().map_err(malformed)?;
                if let Some(builder) = word.as_mut() {
                    match field {
                        Field::Lemma => builder.lemma.push_str(&text),
                        Field::Translation => {
                            if let Some(last) = builder.translations.last_mut() {
                                last.push_str(&text);
                            }
                        }
                        Field::None => {}
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if depth > 0 || word.is_some() {
        return Err(DecodeError::Truncated);
    }
    if !saw_root {
        return Err(DecodeError::Malformed("no root element".to_string()));
    }
    Ok(trie)
}

fn open_element(
    e: &BytesStart,
    word: &mut Option<WordBuilder>,
    field: &mut Field,
) -> Result<(), DecodeError> {
    match e.name().as_ref() {
        b"w" => {
            if word.is_some() {
                return Err(malformed("<w> nested inside another <w>"));
            }
            *word = Some(WordBuilder {
                headword: attribute(e, b"v")?,
                ..Default::default()
            });
        }
        b"l" if word.is_some() => *field = Field::Lemma,
        b"r" => {
            if let Some(builder) = word.as_mut() {
                builder.translations.push(String::new());
                *field = Field::Translation;
            }
        }
        b"s" => {
            if let Some(builder) = word.as_mut() {
                builder.pos = attribute(e, b"n")?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn close_element(
    name: &[u8],
    trie: &mut Trie,
    word: &mut Option<WordBuilder>,
    field: &mut Field,
) -> Result<(), DecodeError> {
    match name {
        b"l" | b"r" => *field = Field::None,
        b"w" => {
            let Some(builder) = word.take() else {
                return Ok(());
            };
            let headword = builder
                .headword
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| builder.lemma.trim().to_string());
            if headword.is_empty() {
                return Err(malformed("<w> without a headword"));
            }
            let translations = builder
                .translations
                .into_iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty());
            trie.insert(&headword, Entry::new(builder.pos.unwrap_or_default(), translations));
            *field = Field::None;
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode, TrieFormat};

    const LEGACY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<trie>
  <t v="c">
    <t v="ca">
      <w v="car"><l>car<s n="N"/></l><r>bil</r></w>
      <w v="cat"><l>cat<s n="N"/></l><r>katt</r><r>pus</r></w>
      <t v="carp">
        <w v="carpet"><l>carpet<s n="N"/></l><r>golvteppe</r></w>
      </t>
    </t>
  </t>
  <w><l>dog</l><r>hund &amp; bikkje</r></w>
</trie>"#;

    #[test]
    fn test_legacy_decodes_through_format_detection() {
        assert_eq!(TrieFormat::detect(LEGACY.as_bytes()), Some(TrieFormat::LegacyXml));
        let trie = decode(LEGACY.as_bytes()).unwrap();
        assert_eq!(trie.len(), 4);

        let cat = trie.find_exact("cat").unwrap();
        assert_eq!(cat[0].pos, "N");
        assert_eq!(cat[0].translations, vec!["katt", "pus"]);

        let dog = trie.find_exact("dog").unwrap();
        assert_eq!(dog[0].pos, "");
        assert_eq!(dog[0].translations, vec!["hund & bikkje"]);

        let words: Vec<String> = trie.prefix_search("ca").map(|h| h.unwrap().word).collect();
        assert_eq!(words, vec!["car", "carpet", "cat"]);
    }

    #[test]
    fn test_legacy_errors() {
        assert!(matches!(
            decode_xml(b"<trie><w v=\"a\"><l>a</l>", Collation::Codepoint),
            Err(DecodeError::Truncated | DecodeError::Malformed(_))
        ));
        assert!(matches!(
            decode_xml(b"<trie><w><l></l><r>x</r></w></trie>", Collation::Codepoint),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            decode_xml(b"<trie><w v=\"a\"><w v=\"b\"/></w></trie>", Collation::Codepoint),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            decode_xml(b"<trie></x>", Collation::Codepoint),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            decode_xml(b"\xff<trie/>", Collation::Codepoint),
            Err(DecodeError::Malformed(_))
        ));
    }
}
