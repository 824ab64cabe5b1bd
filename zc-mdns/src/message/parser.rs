use super::header::*;
use super::name::*;
use super::question::*;
use super::resource::*;
use super::*;
use shared::error::*;

#[derive(Default, Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Section {
    #[default]
    NotStarted,
    Questions,
    Answers,
    Authorities,
    Additionals,
    Done,
}

// Parser is an incremental DNS message parser.
//
// Sections are consumed in order: questions, answers, authorities,
// additionals. Entries left unread in an earlier section are skipped when a
// later section is requested. A record whose body cannot be decoded is
// dropped and the offset advances to the declared end of its data, so one
// bad record does not take the rest of the message with it.
#[derive(Default)]
pub(crate) struct Parser<'a> {
    msg: &'a [u8],
    header: HeaderInternal,
    section: Section,
    off: usize,
    index: usize,
}

impl<'a> Parser<'a> {
    pub(crate) fn start(&mut self, msg: &'a [u8]) -> Result<Header> {
        *self = Parser {
            msg,
            ..Parser::default()
        };
        self.off = self.header.unpack(msg, 0)?;
        self.section = Section::Questions;
        Ok(self.header.header())
    }

    fn section_count(&self, section: Section) -> usize {
        match section {
            Section::Questions => self.header.questions as usize,
            Section::Answers => self.header.answers as usize,
            Section::Authorities => self.header.authorities as usize,
            Section::Additionals => self.header.additionals as usize,
            _ => 0,
        }
    }

    fn next_section(&mut self) {
        self.section = match self.section {
            Section::NotStarted => Section::Questions,
            Section::Questions => Section::Answers,
            Section::Answers => Section::Authorities,
            Section::Authorities => Section::Additionals,
            _ => Section::Done,
        };
        self.index = 0;
    }

    fn advance_to(&mut self, section: Section) -> Result<()> {
        if self.section == Section::NotStarted {
            return Err(Error::ErrNotStarted);
        }
        while self.section < section {
            if self.index >= self.section_count(self.section) {
                self.next_section();
                continue;
            }
            // Skip an entry the caller never asked for.
            self.off = if self.section == Section::Questions {
                Question::skip(self.msg, self.off)?
            } else {
                Resource::skip(self.msg, self.off)?
            };
            self.index += 1;
        }
        if self.section > section {
            return Err(Error::ErrSectionDone);
        }
        if self.index >= self.section_count(section) {
            self.next_section();
            return Err(Error::ErrSectionDone);
        }
        Ok(())
    }

    pub(crate) fn question(&mut self) -> Result<Question> {
        self.advance_to(Section::Questions)?;
        let mut name = Name::default();
        let off = name.unpack(self.msg, self.off)?;
        let mut typ = DnsType::default();
        let off = typ.unpack(self.msg, off)?;
        let mut class = DnsClass::default();
        let off = class.unpack(self.msg, off)?;
        self.off = off;
        self.index += 1;
        Ok(Question { name, typ, class })
    }

    pub(crate) fn all_questions(&mut self) -> Result<Vec<Question>> {
        let mut questions = Vec::with_capacity(self.header.questions as usize);
        loop {
            match self.question() {
                Ok(q) => questions.push(q),
                Err(Error::ErrSectionDone) => return Ok(questions),
                Err(err) => return Err(err),
            }
        }
    }

    pub(crate) fn skip_all_questions(&mut self) -> Result<()> {
        loop {
            match self.advance_to(Section::Questions) {
                Ok(()) => {
                    self.off = Question::skip(self.msg, self.off)?;
                    self.index += 1;
                }
                Err(Error::ErrSectionDone) => return Ok(()),
                Err(err) => return Err(err),
            }
        }
    }

    // resource parses the next record of the given section. Ok(None) means
    // the record was present but undecodable and has been skipped.
    fn resource(&mut self, section: Section) -> Result<Option<Resource>> {
        self.advance_to(section)?;
        let mut header = ResourceHeader::default();
        let off = header.unpack(self.msg, self.off)?;
        let body_end = off + header.length as usize;
        if body_end > self.msg.len() {
            return Err(Error::ErrResourceLen);
        }
        self.off = body_end;
        self.index += 1;
        match unpack_resource_body(header.typ, self.msg, off, header.length as usize) {
            // A body must consume exactly the declared record data.
            Ok((body, parsed_off)) if parsed_off == body_end => Ok(Some(Resource {
                header,
                body: Some(body),
            })),
            Ok(_) => {
                log::warn!(
                    "skipping {} record at offset {off}: data length mismatch",
                    header.typ
                );
                Ok(None)
            }
            Err(err) => {
                log::warn!(
                    "skipping malformed {} record at offset {off}: {err}",
                    header.typ
                );
                Ok(None)
            }
        }
    }

    fn all_resources(&mut self, section: Section) -> Result<Vec<Resource>> {
        let mut resources = Vec::with_capacity(self.section_count(section));
        loop {
            match self.resource(section) {
                Ok(Some(r)) => resources.push(r),
                Ok(None) => {}
                Err(Error::ErrSectionDone) => return Ok(resources),
                Err(err) => return Err(err),
            }
        }
    }

    pub(crate) fn answer(&mut self) -> Result<Option<Resource>> {
        self.resource(Section::Answers)
    }

    pub(crate) fn all_answers(&mut self) -> Result<Vec<Resource>> {
        self.all_resources(Section::Answers)
    }

    pub(crate) fn all_authorities(&mut self) -> Result<Vec<Resource>> {
        self.all_resources(Section::Authorities)
    }

    pub(crate) fn all_additionals(&mut self) -> Result<Vec<Resource>> {
        self.all_resources(Section::Additionals)
    }
}
